use std::fmt::Display;

use crate::State;

/// Runs one command of the plugin and turns its outcome into an exit state.
///
/// Errors are mapped to a [State] by the handler given to [Runner::on_error], or UNKNOWN if none
/// was given.
pub struct Runner<E> {
    on_error: Option<Box<dyn FnOnce(&E) -> State>>,
}

impl<E: Display> Runner<E> {
    pub fn new() -> Self {
        Self { on_error: None }
    }

    pub fn on_error(mut self, f: impl FnOnce(&E) -> State + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// This will run either the default `on_error` handler or the one specified by calling
    /// [Runner::on_error]. The closure reports the state it wants to exit with.
    pub fn safe_run(self, f: impl FnOnce() -> Result<State, E>) -> RunnerResult<E> {
        match f() {
            Ok(state) => RunnerResult::Ok(state),
            Err(err) => {
                let state = self
                    .on_error
                    .map(|f| f(&err))
                    .unwrap_or(State::Unknown);

                RunnerResult::Err(state, err)
            }
        }
    }
}

impl<E: Display> Default for Runner<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum RunnerResult<E> {
    Ok(State),
    Err(State, E),
}

impl<E: Display> RunnerResult<E> {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunnerResult::Ok(state) | RunnerResult::Err(state, _) => state.exit_code(),
        }
    }

    pub fn print_and_exit(self) -> ! {
        if let RunnerResult::Err(state, ref err) = self {
            println!("{}: {}", state, err);
        }
        std::process::exit(self.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("woops")]
    struct EmptyError;

    #[test]
    fn test_runner_ok() {
        let result = Runner::<EmptyError>::new()
            .on_error(|_| panic!("handler must not run"))
            .safe_run(|| Ok(State::Warning));

        assert!(matches!(result, RunnerResult::Ok(State::Warning)));
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn test_runner_error() {
        let result = Runner::<EmptyError>::new()
            .on_error(|_| State::Critical)
            .safe_run(|| Err(EmptyError {}));

        assert!(matches!(result, RunnerResult::Err(State::Critical, _)));
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn test_runner_default_handler() {
        let result = Runner::<EmptyError>::new().safe_run(|| Err(EmptyError {}));

        assert!(matches!(result, RunnerResult::Err(State::Unknown, _)));
    }

    #[test]
    fn test_runner_anyhow() {
        let result = Runner::<anyhow::Error>::new()
            .on_error(|err| {
                if err.to_string().contains("timeout") {
                    State::Critical
                } else {
                    State::Unknown
                }
            })
            .safe_run(|| Err(anyhow::anyhow!("request timeout after 10s")));

        match result {
            RunnerResult::Err(state, err) => {
                assert_eq!(state, State::Critical);
                assert_eq!(err.to_string(), "request timeout after 10s");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
