// Signed status codes for callers that speak in integers
//
// 0 is success, negative values are fatal for the call, RETRY asks the
// caller to repeat the same call.

pub const OK: i32 = 0;
pub const PWM_ERROR: i32 = -1;
pub const COMM_ERROR: i32 = -2;
pub const NOT_FOUND: i32 = -3;
pub const STATE_ERROR: i32 = -4;
pub const RETRY: i32 = 2;

/// Maps an error onto its status code.
pub trait Status {
    fn status(&self) -> i32;
}

/// Status code for a whole result: `OK` on success, the error's code otherwise.
pub fn status_code<T, E: Status>(result: &Result<T, E>) -> i32 {
    match result {
        Ok(_) => OK,
        Err(e) => e.status(),
    }
}
