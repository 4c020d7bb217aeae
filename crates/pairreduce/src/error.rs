// We follow the same approach as before: the `pairreduce_nostd_internal`
// crate reports problems with `&'static str` and this crate wraps those
// strings in a proper error type. Over time, the internal crate should grow
// its own error type.
//
// The evaluators also need to report a status code (0 means success). The
// codes are derived from the error kind, so they live here too.

/// Status codes reported by [`Error::status_code`] and [`status_of`]
pub mod status {
    pub const SUCCESS: i32 = 0;
    /// width mismatch, malformed ranges, bad configuration values
    pub const CONFIGURATION: i32 = 1;
    /// the backend doesn't support one of the vector widths
    pub const UNSUPPORTED_SHAPE: i32 = 2;
    /// allocation of working memory (host or device) failed
    pub const RESOURCE: i32 = 3;
    /// no gradient rule exists for the requested derivative
    pub const UNSUPPORTED_GRADIENT: i32 = 4;
}

#[derive(Debug)]
pub struct Error {
    // I'm not so sure we want to directly expose this
    kind: ErrorKind,
}

/// The underlying internal error type
#[non_exhaustive]
#[derive(Clone, Debug)]
enum ErrorKind {
    /// An error that occurs when the pieces of a calculation are mutually
    /// inconsistent (e.g. widths or index ranges) or malformed
    Configuration(ConfigurationError),
    /// An error that occurs when an integer lies outside of the acceptable
    /// range of values
    IntegerRange(IntegerRangeError),
    /// An error that occurs within `pairreduce_nostd_internal`
    ///
    /// The idea is to wrap the stringly errors that are pervasive within
    /// `pairreduce_nostd_internal`.
    InternalLegacyAdHoc(InternalLegacyAdHocError),
    /// An error that occurs when an unknown reduction name is specified
    ReductionName(ReductionNameError),
    /// An error that occurs when working memory can't be allocated
    Resource(ResourceError),
    /// An error that occurs when there is no rule for differentiating a
    /// reduction
    UnsupportedGradient(UnsupportedGradientError),
    /// An error that occurs when a backend receives a vector width that it
    /// wasn't built for
    UnsupportedShape(UnsupportedShapeError),
}

// define constructor methods for Error
impl Error {
    /// produce an error indicating an inconsistent or malformed configuration
    pub(crate) fn configuration(what: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::Configuration(ConfigurationError { what: what.into() }),
        }
    }

    /// produce an error indicating that an integer lies outside the acceptable
    /// range of values
    pub(crate) fn integer_range(
        description: &'static str,
        actual: i64,
        min_val: i64,
        max_val: i64,
    ) -> Self {
        Error {
            kind: ErrorKind::IntegerRange(IntegerRangeError {
                description,
                actual,
                min_val,
                max_val,
            }),
        }
    }

    /// wraps a legacy internal error string
    pub(crate) fn internal_legacy_adhoc(message: &'static str) -> Self {
        Error {
            kind: ErrorKind::InternalLegacyAdHoc(InternalLegacyAdHocError(message)),
        }
    }

    /// produce an error indicating that an unknown reduction name was
    /// specified
    pub(crate) fn reduction_name(actual: String, mut choices: Vec<String>) -> Self {
        choices.sort();
        Error {
            kind: ErrorKind::ReductionName(ReductionNameError { actual, choices }),
        }
    }

    /// produce an error indicating that `n_bytes` of working memory couldn't
    /// be allocated
    pub(crate) fn resource(who: &'static str, n_bytes: usize) -> Self {
        Error {
            kind: ErrorKind::Resource(ResourceError { who, n_bytes }),
        }
    }

    /// produce an error indicating that the named reduction can't be
    /// differentiated (in the requested manner)
    pub(crate) fn unsupported_gradient(reduction: String, reason: &'static str) -> Self {
        Error {
            kind: ErrorKind::UnsupportedGradient(UnsupportedGradientError { reduction, reason }),
        }
    }

    /// produce an error indicating that a backend can't handle vectors of
    /// width `width`
    pub(crate) fn unsupported_shape(width: usize, supported: Vec<usize>) -> Self {
        Error {
            kind: ErrorKind::UnsupportedShape(UnsupportedShapeError { width, supported }),
        }
    }
}

impl Error {
    /// The nonzero status code associated with this error
    pub fn status_code(&self) -> i32 {
        match self.kind {
            ErrorKind::Configuration(_)
            | ErrorKind::IntegerRange(_)
            | ErrorKind::InternalLegacyAdHoc(_)
            | ErrorKind::ReductionName(_) => status::CONFIGURATION,
            ErrorKind::UnsupportedShape(_) => status::UNSUPPORTED_SHAPE,
            ErrorKind::Resource(_) => status::RESOURCE,
            ErrorKind::UnsupportedGradient(_) => status::UNSUPPORTED_GRADIENT,
        }
    }
}

/// Collapse the result of an evaluator call to a status code (`0` means
/// success)
pub fn status_of<T>(result: &Result<T, Error>) -> i32 {
    match result {
        Ok(_) => status::SUCCESS,
        Err(err) => err.status_code(),
    }
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for ErrorKind {}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            ErrorKind::Configuration(ref err) => err.fmt(f),
            ErrorKind::IntegerRange(ref err) => err.fmt(f),
            ErrorKind::InternalLegacyAdHoc(ref msg) => msg.fmt(f),
            ErrorKind::ReductionName(ref err) => err.fmt(f),
            ErrorKind::Resource(ref err) => err.fmt(f),
            ErrorKind::UnsupportedGradient(ref err) => err.fmt(f),
            ErrorKind::UnsupportedShape(ref err) => err.fmt(f),
        }
    }
}

/// An error that occurs when the pieces of a calculation don't fit together
#[derive(Clone, Debug)]
struct ConfigurationError {
    what: String,
}

impl std::error::Error for ConfigurationError {}

impl core::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "invalid configuration: {}", self.what)
    }
}

/// An error that occurs when an integer lies outside of the acceptable
/// range of values
#[derive(Clone, Debug)]
struct IntegerRangeError {
    description: &'static str,
    actual: i64,
    min_val: i64,
    max_val: i64,
}

impl std::error::Error for IntegerRangeError {}

impl core::fmt::Display for IntegerRangeError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{} has a value of {}. The value should be no less than {} and \
             not exceed {}",
            self.description, self.actual, self.min_val, self.max_val
        )
    }
}

/// A temporary type that wraps the string errors from
/// `pairreduce_nostd_internal`.
#[derive(Clone)]
struct InternalLegacyAdHocError(&'static str);

impl std::error::Error for InternalLegacyAdHocError {}

impl core::fmt::Display for InternalLegacyAdHocError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::fmt::Debug for InternalLegacyAdHocError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.0, f)
    }
}

/// An error occurs when an unknown reduction name is specified
#[derive(Clone, Debug)]
struct ReductionNameError {
    actual: String,
    choices: Vec<String>,
}

impl std::error::Error for ReductionNameError {}

impl core::fmt::Display for ReductionNameError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{} is not a reduction name. Choices include: {:?}",
            self.actual, self.choices
        )
    }
}

/// An error that occurs when working memory can't be allocated
#[derive(Clone, Debug)]
struct ResourceError {
    who: &'static str,
    n_bytes: usize,
}

impl std::error::Error for ResourceError {}

impl core::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "unable to allocate {} bytes for the {}",
            self.n_bytes, self.who
        )
    }
}

#[derive(Clone, Debug)]
struct UnsupportedGradientError {
    reduction: String,
    reason: &'static str,
}

impl std::error::Error for UnsupportedGradientError {}

impl core::fmt::Display for UnsupportedGradientError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "can't differentiate the \"{}\" reduction: {}",
            self.reduction, self.reason
        )
    }
}

#[derive(Clone, Debug)]
struct UnsupportedShapeError {
    width: usize,
    supported: Vec<usize>,
}

impl std::error::Error for UnsupportedShapeError {}

impl core::fmt::Display for UnsupportedShapeError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "the backend doesn't support vectors of width {}. Supported \
             widths: {:?}",
            self.width, self.supported
        )
    }
}
