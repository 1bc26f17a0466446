//! Error types for the Cinder scripting bridge.

use std::fmt;

/// The result type used throughout the scripting bridge.
pub type Result<T> = std::result::Result<T, Error>;

/// Marker embedded in a run failure when the script was cancelled by an
/// administrative kill. The protected-call boundary reports kills and
/// ordinary runtime errors identically; this message text is the only
/// distinguishing trait.
pub(crate) const KILLED_MESSAGE: &str = "Script killed by user with SCRIPT KILL...";

/// The error type for scripting operations.
#[derive(Debug)]
pub enum Error {
    /// The script body failed to compile.
    Compile(String),

    /// The script failed during invocation.
    Runtime {
        /// Hex digest of the function that was running.
        function: String,
        /// Interpreter message, including source/line when resolvable.
        message: String,
    },

    /// An EVALSHA digest has no cached script body.
    NoScript,

    /// A script invoked a command that is not registered.
    UnknownCommand(String),

    /// A script invoked a command that is flagged as forbidden in scripts.
    Forbidden(String),

    /// A native-call argument was neither a string nor a number.
    ArgumentType,

    /// Script code attempted to create a new global binding.
    GlobalWrite(String),

    /// Script code read a global binding that does not exist.
    GlobalRead(String),

    /// The run was cancelled by an administrative kill.
    Killed {
        /// Hex digest of the function that was killed.
        function: String,
    },

    /// The script body store failed.
    Store(String),

    /// The embedded interpreter failed outside of script execution.
    Engine(String),
}

impl Error {
    /// Creates a new compile error.
    pub fn compile(msg: impl Into<String>) -> Self {
        Error::Compile(msg.into())
    }

    /// Creates a new store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Returns true if this is the NOSCRIPT condition.
    pub fn is_noscript(&self) -> bool {
        matches!(self, Error::NoScript)
    }

    /// Returns true if the run was terminated by SCRIPT KILL.
    pub fn is_killed(&self) -> bool {
        matches!(self, Error::Killed { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(msg) => {
                write!(f, "Error compiling script (new function): {}", msg)
            }
            Error::Runtime { function, message } => {
                write!(f, "Error running script (call to f_{}): {}", function, message)
            }
            Error::NoScript => {
                write!(f, "NOSCRIPT No matching script. Please use EVAL.")
            }
            Error::UnknownCommand(name) => {
                write!(f, "Unknown Redis command called from script: '{}'", name)
            }
            Error::Forbidden(name) => {
                write!(f, "This Redis command is not allowed from scripts: '{}'", name)
            }
            Error::ArgumentType => {
                write!(f, "Lua redis lib command arguments must be strings or integers")
            }
            Error::GlobalWrite(name) => {
                write!(f, "Script attempted to create global variable '{}'", name)
            }
            Error::GlobalRead(name) => {
                write!(f, "Script attempted to access nonexistent global variable '{}'", name)
            }
            Error::Killed { function } => {
                write!(f, "{} (call to f_{})", KILLED_MESSAGE, function)
            }
            Error::Store(msg) => write!(f, "Script store error: {}", msg),
            Error::Engine(msg) => write!(f, "Interpreter error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<mlua::Error> for Error {
    fn from(err: mlua::Error) -> Self {
        Error::Engine(err.to_string())
    }
}
