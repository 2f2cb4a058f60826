use std::{borrow::Cow, time::Duration};

/// Returns valid UTF-8 from potentially incorrectly encoded data, such as the
/// output of an untrusted process. Ill-formed sequences are dropped.
pub fn sanitize_output(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(s) = str::from_utf8(bytes) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    Cow::Owned(out)
}

/// Round a duration to a precision that makes sense to display to the user.
///
/// Below 1ms the value is kept as-is, below 1s it is rounded to the nearest
/// microsecond, and anything longer to the nearest millisecond.
pub fn round_duration(d: Duration) -> Duration {
    const MILLI: u32 = 1_000_000;
    const MICRO: u32 = 1_000;
    if d < Duration::from_millis(1) {
        d
    } else if d < Duration::from_secs(1) {
        round_subsec(d, MICRO)
    } else {
        round_subsec(d, MILLI)
    }
}

// `unit` must divide one second evenly.
fn round_subsec(d: Duration, unit: u32) -> Duration {
    let nanos = (d.subsec_nanos() + unit / 2) / unit * unit;
    Duration::from_secs(d.as_secs()).saturating_add(Duration::from_nanos(nanos as u64))
}

/// Format a duration for logs, e.g. `1.5s`, `12.345ms` or `830ns`.
pub fn format_duration(d: Duration) -> String { format!("{:?}", round_duration(d)) }
