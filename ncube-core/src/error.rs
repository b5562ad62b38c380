use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T, E = NCubeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum NCubeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cube '{cube}' missing required scope: {}", .missing.join(", "))]
    MissingScope { cube: String, missing: Vec<String> },

    #[error("coordinate not found in cube '{cube}': {message}{}", render_chain(.chain))]
    CoordinateNotFound {
        cube: String,
        axis: Option<String>,
        value: Option<String>,
        message: String,
        chain: Option<Vec<String>>,
    },

    #[error("no conditions fired on rule axis '{axis}' of cube '{cube}'{}", render_chain(.chain))]
    NoConditionsFired {
        cube: String,
        axis: String,
        chain: Option<Vec<String>>,
    },

    #[error("error executing cell in cube '{cube}' at {coordinate}: {source}{}", render_frames(.chain))]
    CommandExecution {
        cube: String,
        coordinate: String,
        chain: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("cycle detected: {}", .chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("call depth {depth} exceeds limit {limit}")]
    CallDepthExceeded { depth: usize, limit: usize },

    #[error("unknown cube: {0}")]
    UnknownCube(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn render_chain(chain: &Option<Vec<String>>) -> String {
    chain.as_deref().map(render_frames).unwrap_or_default()
}

fn render_frames(frames: &[String]) -> String {
    if frames.is_empty() {
        String::new()
    } else {
        format!(" [stack: {}]", frames.join(" -> "))
    }
}

impl NCubeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn coordinate_not_found(cube: &str, axis: Option<&str>, message: impl Into<String>) -> Self {
        Self::CoordinateNotFound {
            cube: cube.to_string(),
            axis: axis.map(str::to_string),
            value: None,
            message: message.into(),
            chain: None,
        }
    }

    /// Bad input shape: null names, malformed coordinates, missing scope.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::MissingScope { .. })
    }

    /// `NoConditionsFired` is a specialization of `CoordinateNotFound`.
    pub fn is_coordinate_not_found(&self) -> bool {
        matches!(
            self,
            Self::CoordinateNotFound { .. } | Self::NoConditionsFired { .. }
        )
    }

    /// The call chain recorded when the error crossed a program boundary.
    pub fn call_chain(&self) -> Option<&[String]> {
        match self {
            Self::CoordinateNotFound { chain, .. } | Self::NoConditionsFired { chain, .. } => {
                chain.as_deref()
            }
            Self::CommandExecution { chain, .. } | Self::CycleDetected { chain } => {
                Some(chain.as_slice())
            }
            _ => None,
        }
    }

    /// Attach a call chain to a binding failure unless an inner frame already did.
    pub(crate) fn with_chain(self, frames: Vec<String>) -> Self {
        match self {
            Self::CoordinateNotFound {
                cube,
                axis,
                value,
                message,
                chain: None,
            } => Self::CoordinateNotFound {
                cube,
                axis,
                value,
                message,
                chain: Some(frames),
            },
            Self::NoConditionsFired {
                cube,
                axis,
                chain: None,
            } => Self::NoConditionsFired {
                cube,
                axis,
                chain: Some(frames),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_conditions_fired_is_coordinate_not_found() {
        let e = NCubeError::NoConditionsFired {
            cube: "Rates".into(),
            axis: "rule".into(),
            chain: None,
        };
        assert!(e.is_coordinate_not_found());
        assert!(!e.is_invalid_argument());
    }

    #[test]
    fn missing_scope_is_invalid_argument() {
        let e = NCubeError::MissingScope {
            cube: "Rates".into(),
            missing: vec!["state".into(), "age".into()],
        };
        assert!(e.is_invalid_argument());
        assert_eq!(
            e.to_string(),
            "cube 'Rates' missing required scope: state, age"
        );
    }

    #[test]
    fn chain_attached_once() {
        let e = NCubeError::coordinate_not_found("Inner", Some("state"), "no column for 'ZZ'");
        let e = e.with_chain(vec!["Inner{state:ZZ}".into()]);
        let e = e.with_chain(vec!["Outer{}".into(), "Inner{state:ZZ}".into()]);
        assert_eq!(e.call_chain(), Some(&["Inner{state:ZZ}".to_string()][..]));
        assert_eq!(
            e.to_string(),
            "coordinate not found in cube 'Inner': no column for 'ZZ' [stack: Inner{state:ZZ}]"
        );
    }

    #[test]
    fn display_invalid_argument() {
        let e = NCubeError::invalid("cube name cannot be empty");
        assert_eq!(e.to_string(), "invalid argument: cube name cannot be empty");
    }

    #[test]
    fn display_cycle() {
        let e = NCubeError::CycleDetected {
            chain: vec!["A{}".into(), "B{}".into(), "A{}".into()],
        };
        assert_eq!(e.to_string(), "cycle detected: A{} -> B{} -> A{}");
    }
}
