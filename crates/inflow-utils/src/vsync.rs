use std::time::{Duration, Instant};

/// Runs `f`, then sleeps out the remainder of `duration` if `f` returned
/// early. Used to pace worker loops that would otherwise spin.
#[inline(always)]
pub fn vsync<F, R>(duration: Option<Duration>, f: F) -> R
where
    F: FnOnce() -> R,
{
    match duration {
        Some(duration) if duration != Duration::ZERO => {
            let start_t = Instant::now();
            let out = f();
            let el = start_t.elapsed();
            if el < duration {
                std::thread::sleep(duration - el);
            }
            out
        }
        _ => f(),
    }
}
