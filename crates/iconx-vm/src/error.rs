//! Run-time error codes, their messages and the errors a run reports.

use crate::Desc;

/// Errors that terminate a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// A numbered run-time error raised by the program.
    #[error("{}", render_runtime(.code, .message, .line, .file, .offending))]
    Runtime {
        code: u32,
        message: String,
        /// Source line of the failing instruction; `0` in startup code.
        line: u32,
        file: String,
        /// Image of the offending value, when there is one.
        offending: Option<String>,
    },
    /// An internal inconsistency in the interpreter or the image it is running.
    #[error("System error at line {line} in {file}\n{message}\n")]
    System {
        message: String,
        line: u32,
        file: String,
    },
    /// The image could not be brought up.
    #[error("{message}")]
    Startup { message: String },
}

impl RunError {
    /// The process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

fn render_runtime(
    code: &u32,
    message: &str,
    line: &u32,
    file: &str,
    offending: &Option<String>,
) -> String {
    let mut out = if *line == 0 {
        format!("Run-time error {code} in startup code\n{message}\n")
    } else {
        format!("Run-time error {code} at line {line} in {file}\n{message}\n")
    };
    if let Some(image) = offending {
        out.push_str("offending value: ");
        out.push_str(image);
        out.push('\n');
    }
    out
}

/// The message for run-time error `code`.
pub fn error_message(code: u32) -> &'static str {
    match code {
        101 => "integer expected",
        102 => "numeric expected",
        103 => "string expected",
        104 => "cset expected",
        105 => "file expected",
        106 => "procedure or integer expected",
        107 => "record expected",
        108 => "list expected",
        109 => "string or file expected",
        110 => "string or list expected",
        111 => "variable expected",
        112 => "invalid type to size operation",
        113 => "invalid type to random operation",
        114 => "invalid type to subscript operation",
        115 => "list or table expected",
        116 => "invalid type to element generator",
        117 => "missing main procedure",
        118 => "co-expression expected",
        119 => "set expected",

        201 => "division by zero",
        202 => "remaindering by zero",
        203 => "integer overflow",
        204 => "real overflow, underflow, or division by zero",
        205 => "value out of range",
        206 => "negative first operand to real exponentiation",
        207 => "invalid field name",
        208 => "second and third arguments to map of unequal length",
        209 => "invalid second argument to open",
        210 => "argument to system function too long",
        211 => "by clause equal to zero",
        212 => "attempt to read file not open for reading",
        213 => "attempt to write file not open for writing",
        214 => "recursive co-expression activation",

        301 => "interpreter stack overflow",
        302 => "C stack overflow",
        303 => "unable to expand memory region",
        304 => "memory region size changed",

        _ => "unknown run-time error",
    }
}

/// How an instruction handler abandons normal execution.
///
/// Expression failure is not a fault; it is handled by `efail` inside the interpreter.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    Runtime { code: u32, value: Option<Desc> },
    System(String),
    /// `exit(n)` or `stop(...)`.
    Exit(i32),
}

pub(crate) fn runerr<T>(code: u32, value: Desc) -> Result<T, Fault> {
    Err(Fault::Runtime {
        code,
        value: Some(value),
    })
}

pub(crate) fn runerr_bare<T>(code: u32) -> Result<T, Fault> {
    Err(Fault::Runtime { code, value: None })
}

pub(crate) fn syserr<T>(message: impl Into<String>) -> Result<T, Fault> {
    Err(Fault::System(message.into()))
}

impl From<iconx_gc::GcError> for Fault {
    fn from(err: iconx_gc::GcError) -> Self {
        log::warn!("{err}");
        Fault::Runtime {
            code: 303,
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_render_with_location_and_offending_value() {
        let err = RunError::Runtime {
            code: 101,
            message: error_message(101).to_string(),
            line: 7,
            file: "t.icn".to_string(),
            offending: Some("\"abc\"".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Run-time error 101 at line 7 in t.icn\ninteger expected\noffending value: \"abc\"\n"
        );
    }

    #[test]
    fn startup_errors_omit_the_location() {
        let err = RunError::Runtime {
            code: 117,
            message: error_message(117).to_string(),
            line: 0,
            file: String::new(),
            offending: None,
        };
        assert_eq!(
            err.to_string(),
            "Run-time error 117 in startup code\nmissing main procedure\n"
        );
        assert_eq!(err.exit_code(), 1);
    }
}
