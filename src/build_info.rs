/// Build-time git commit SHA stamped by build.rs when available.
pub fn git_sha() -> Option<&'static str> {
    option_env!("TENANTIZE_BUILD_GIT_SHA")
}

/// First seven characters of [`git_sha`], for report headers.
pub fn short_sha() -> Option<&'static str> {
    git_sha().map(|sha| sha.get(..7).unwrap_or(sha))
}
