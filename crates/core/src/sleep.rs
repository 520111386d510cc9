use std::thread;
use std::time::Duration;

/// Sleep for exact milliseconds; zero returns immediately.
pub fn sleep_ms(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Sleep for `total`, waking every `step` to ask `interrupted` whether to stop early.
/// Returns true if the wait was cut short.
pub fn sleep_interruptible(total: Duration, step: Duration, mut interrupted: impl FnMut() -> bool) -> bool {
    let mut left = total;
    while !left.is_zero() {
        if interrupted() {
            return true;
        }
        let chunk = left.min(step);
        thread::sleep(chunk);
        left -= chunk;
    }
    interrupted()
}
