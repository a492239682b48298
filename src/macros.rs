macro_rules! impl_to_perf_string_on_to_string {
    ($($t:ty), *) => {
        $(
            impl ToPerfString for $t {
                fn to_perf_string(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

/// Lets you simply create a named resource from multiple check results. It's a bit like the vec!
/// macro.
/// ```rust
/// # #[macro_use]
/// # extern crate opnsense_agent;
/// #
/// # use opnsense_agent::{CheckResult, State};
/// #
/// # fn main() {
/// let r1 = CheckResult::ok("Online");
/// let r2 = CheckResult::warn("Maintenance Mode is active");
/// let resource = resource!["CARP"; r1, r2];
/// assert_eq!(resource.get_state(), State::Warning);
/// # }
/// ```
#[macro_export]
macro_rules! resource {
    ($name:expr; $( $r:expr ), *) => {
        {
            let mut r = $crate::Resource::new($name);
            $(
                r.push($r);
            )*
            r
        }
    };
}

macro_rules! metric_string {
    ($name:expr, $( $tps:expr), *) => {
        {
            let mut s = String::new();
            s.push_str(&format!("{}=", $name));
            $(
                s.push_str(&$tps.to_perf_string());
                s.push(';');
            )*
            s.trim_end_matches(';').to_string()
        }
    };
}
