//! AWS error classification
//!
//! Maps SDK failures onto [`ApiError`]. Dispatch failures and timeouts are transport
//! errors; otherwise the service error code decides, then the HTTP status.

use crate::error::ApiError;
use aws_sdk_ecr::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

/// Codes meaning the repository (or another addressed entity) does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "RepositoryNotFoundException",
    "RegistryPolicyNotFoundException",
    "NoSuchBucket",
];

/// Codes meaning the caller is not allowed to perform the call
const AUTHORIZATION_CODES: &[&str] = &[
    "AccessDeniedException",
    "AccessDenied",
    "UnauthorizedOperation",
    "UnrecognizedClientException",
    "InvalidClientTokenId",
    "InvalidSignatureException",
    "ExpiredTokenException",
    "ExpiredToken",
];

/// Codes for throttling / rate limiting
const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "SlowDown",
];

/// Codes for transient service-side failures
const TRANSIENT_CODES: &[&str] = &[
    "ServerException",
    "InternalFailure",
    "InternalError",
    "ServiceUnavailable",
    "ServiceUnavailableException",
];

/// Classify a failure from its error code, HTTP status and message
pub fn classify_api_error(code: Option<&str>, status: Option<u16>, message: &str) -> ApiError {
    let message = message.to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => return ApiError::NotFound(message),
        Some(c) if AUTHORIZATION_CODES.contains(&c) => return ApiError::Authorization(message),
        Some(c) if THROTTLING_CODES.contains(&c) => return ApiError::Throttling(message),
        Some(c) if TRANSIENT_CODES.contains(&c) => return ApiError::Transport(message),
        _ => {}
    }

    match status {
        Some(401) | Some(403) => ApiError::Authorization(message),
        Some(404) => ApiError::NotFound(message),
        Some(429) => ApiError::Throttling(message),
        Some(s) if s >= 500 => ApiError::Transport(message),
        _ => ApiError::Service {
            code: code.map(|c| c.to_string()),
            message,
        },
    }
}

/// Classify an SDK error of any ECR or S3 operation
pub fn from_sdk_error<E>(err: SdkError<E>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if matches!(err, SdkError::TimeoutError(_)) {
        return ApiError::TimedOut(DisplayErrorContext(&err).to_string());
    }
    if matches!(err, SdkError::DispatchFailure(_)) {
        return ApiError::Transport(DisplayErrorContext(&err).to_string());
    }

    let status = err.raw_response().map(|raw| raw.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    classify_api_error(code.as_deref(), status, &message)
}
