use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota};
use warp::{Filter, Rejection};

use crate::error::ApiError;

pub type RateLimiter = DefaultDirectRateLimiter;

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "User-Agent",
            "Sec-Fetch-Mode",
            "Referer",
            "Origin",
            "Access-Control-Request-Method",
            "Access-Control-Request-Headers",
            "Content-Type",
            "Authorization",
            "Accept",
            "Content-Length",
        ])
        .allow_methods(vec!["POST", "GET", "OPTIONS"])
}

/// `None` when `per_minute` is zero, which disables limiting.
pub fn rate_limiter(per_minute: u32) -> Option<Arc<RateLimiter>> {
    NonZeroU32::new(per_minute).map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))))
}

pub fn rate_limit(
    limiter: Option<Arc<RateLimiter>>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::any()
        .and_then(move || {
            let limiter = limiter.clone();
            async move {
                match limiter {
                    Some(limiter) if limiter.check().is_err() => {
                        Err(warp::reject::custom(ApiError::RateLimitExceeded))
                    }
                    _ => Ok(()),
                }
            }
        })
        .untuple_one()
}
