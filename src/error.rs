use thiserror::Error;

/// The closed set of error kinds a `kgsm_core` operation may surface.
///
/// Each kind maps to a stable process exit code at the CLI boundary
/// (see [`Error::exit_code`]); the 200-range "success" exit codes used
/// internally by the original shell implementation never escape here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Permission,
    Io,
    Dependency,
    State,
    Timeout,
    Upstream,
    General,
}

#[derive(Error, Debug)]
#[error("{kind:?} in {component}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub component: &'static str,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            component,
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, component, message)
    }

    pub fn invalid(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, component, message)
    }

    pub fn permission(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, component, message)
    }

    pub fn dependency(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, component, message)
    }

    pub fn state(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, component, message)
    }

    pub fn timeout(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, component, message)
    }

    pub fn upstream(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, component, message)
    }

    pub fn general(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::General, component, message)
    }

    pub fn io(component: &'static str, err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            component,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Stable exit code subset from spec section 7.
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::General => 1,
            ErrorKind::NotFound => 5,
            ErrorKind::Invalid => 8,
            ErrorKind::Permission => 16,
            ErrorKind::Dependency => 21,
            ErrorKind::State => 29,
            ErrorKind::Timeout => 1,
            ErrorKind::Upstream => 1,
            ErrorKind::Io => 1,
        }
    }

    /// One-line, user-facing rendering: `[ERROR] <kind>: <detail>`.
    pub fn user_line(&self) -> String {
        format!("[ERROR] {:?}: {}", self.kind, self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io("io", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::invalid("serde_json", err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::invalid("config", err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::invalid("config", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_stable_subset() {
        assert_eq!(Error::not_found("x", "y").exit_code(), 5);
        assert_eq!(Error::invalid("x", "y").exit_code(), 8);
        assert_eq!(Error::permission("x", "y").exit_code(), 16);
        assert_eq!(Error::dependency("x", "y").exit_code(), 21);
        assert_eq!(Error::state("x", "y").exit_code(), 29);
    }

    #[test]
    fn user_line_is_one_line_with_kind_prefix() {
        let e = Error::invalid("blueprint", "missing executable_file");
        let line = e.user_line();
        assert!(line.starts_with("[ERROR] Invalid:"));
        assert!(!line.contains('\n'));
    }
}
