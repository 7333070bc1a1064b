use std::env;
use std::str::FromStr;

/// Parses `name` from the environment, ignoring unset or malformed values.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Returns the variable if it is set to a non-empty string.
pub fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// True when `name` is present in the environment, whatever its value.
pub fn env_flag(name: &str) -> bool {
    env::var_os(name).is_some()
}
