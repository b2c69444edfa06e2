use std::fmt::Display;

/// Run `op` up to `attempts` times (at least once).
///
/// Stops on the first success, or as soon as `is_retryable` rejects an error.
/// Returns the last error otherwise.
pub fn retry<T, E, F, P>(attempts: usize, is_retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                log::warn!("attempt {attempt}/{attempts} failed, retrying: {err}");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
