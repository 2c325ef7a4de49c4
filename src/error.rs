use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("raw is too small for a message body section")]
    ErrBodyTooShort,
    #[error("message body is not an amqp-value section")]
    ErrBodyNotAmqpValue,
    #[error("tracking update body is not a list")]
    ErrTrackingNotList,
    #[error("tracking update list must contain exactly two elements")]
    ErrTrackingElementCount,
    #[error("tracking update address is not a scalar")]
    ErrTrackingAddressNotScalar,
    #[error("tracking update reachability flag is not a boolean")]
    ErrTrackingReachableNotBool,
    #[error("element length exceeds the enclosing list")]
    ErrElementOverrun,
    #[error("unhandled format code `{code:#04x}`")]
    ErrFormatCodeUnhandled { code: u8 },
    #[error("tracking update address is too long to marshal")]
    ErrAddressTooLong,
}
