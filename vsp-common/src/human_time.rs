//! Human-readable duration formatting
//!
//! Provides the track and queue duration labels used in session
//! notifications.

/// Split a duration in seconds into zero-padded minutes and seconds.
///
/// Minutes are not wrapped at 60, so a 75 minute track reads `75:00`.
///
/// # Examples
///
/// ```
/// use vsp_common::human_time::min_sec;
///
/// assert_eq!(min_sec(0), ("00".to_string(), "00".to_string()));
/// assert_eq!(min_sec(65), ("01".to_string(), "05".to_string()));
/// assert_eq!(min_sec(4500), ("75".to_string(), "00".to_string()));
/// ```
pub fn min_sec(seconds: u64) -> (String, String) {
    let sec = seconds % 60;
    let min = seconds / 60;
    (format!("{:02}", min), format!("{:02}", sec))
}

/// Split a duration in seconds into hours, zero-padded minutes and seconds.
///
/// # Examples
///
/// ```
/// use vsp_common::human_time::hour_min_sec;
///
/// assert_eq!(
///     hour_min_sec(3725),
///     ("1".to_string(), "02".to_string(), "05".to_string())
/// );
/// ```
pub fn hour_min_sec(seconds: u64) -> (String, String, String) {
    let sec = seconds % 60;
    let min = (seconds / 60) % 60;
    let hour = seconds / 3600;
    (hour.to_string(), format!("{:02}", min), format!("{:02}", sec))
}

/// Format a track length as `MM:SS`.
///
/// ```
/// use vsp_common::human_time::format_track_length;
///
/// assert_eq!(format_track_length(212), "03:32");
/// ```
pub fn format_track_length(seconds: u64) -> String {
    let (min, sec) = min_sec(seconds);
    format!("{}:{}", min, sec)
}

/// Format a total queue length, omitting the hour field when it is zero.
///
/// ```
/// use vsp_common::human_time::format_queue_length;
///
/// assert_eq!(format_queue_length(754), "12:34");
/// assert_eq!(format_queue_length(3725), "1:02:05");
/// ```
pub fn format_queue_length(seconds: u64) -> String {
    let (hour, min, sec) = hour_min_sec(seconds);
    if hour == "0" {
        format!("{}:{}", min, sec)
    } else {
        format!("{}:{}:{}", hour, min, sec)
    }
}
