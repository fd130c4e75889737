use std::env;
use std::fmt::Debug;
use std::str::FromStr;

/// Returns the value of the named environment variable if it exists or panics.
pub fn get_variable(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("must define {} environment variable", name))
}

/// Returns the parsed value of the named environment variable, or
/// `default` if it isn’t set. Panics if it’s set but can’t be parsed.
pub fn get_optional_variable<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Debug,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|e| panic!("parse {} ({:?}): {:?}", name, value, e)),
        Err(_) => default,
    }
}

/// Returns whether the named environment variable is set to `1`.
pub fn get_flag(name: &str) -> bool {
    env::var(name).map(|v| v == "1").unwrap_or(false)
}
