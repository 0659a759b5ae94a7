use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;

/// Number of video frames stacked into one FF file.
pub const FF_NFRAMES: u32 = 256;

/// Julian date of the Unix epoch (1970-01-01T00:00:00 UTC).
const JD_UNIX_EPOCH: f64 = 2440587.5;

/// Offset between Julian date and Modified Julian date.
const MJD_OFFSET: f64 = 2400000.5;

/// Extract the capture start time encoded in an FF file name.
///
/// FF names follow `FF_<station>_<YYYYMMDD>_<HHMMSS>_<mmm>...`, e.g.
/// `FF_XX0001_20230101_000000_000.fits`.
pub fn filename_to_datetime(ff_name: &str) -> Result<NaiveDateTime> {
    let re = Regex::new(r"^FF_[A-Za-z0-9]+_(\d{8})_(\d{6})_(\d{3})")?;
    let caps = re
        .captures(ff_name)
        .ok_or_else(|| anyhow!("Not a valid FF file name: {}", ff_name))?;

    let date = &caps[1];
    let time = &caps[2];
    let millis: u32 = caps[3].parse()?;

    let year: i32 = date[0..4].parse()?;
    let month: u32 = date[4..6].parse()?;
    let day: u32 = date[6..8].parse()?;
    let hour: u32 = time[0..2].parse()?;
    let minute: u32 = time[2..4].parse()?;
    let second: u32 = time[4..6].parse()?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_milli_opt(hour, minute, second, millis))
        .ok_or_else(|| anyhow!("FF file name encodes an invalid date: {}", ff_name))
}

/// Time of the middle of the FF file: start time plus half the stacked
/// frames at the configured frame rate.
pub fn middle_time(start: NaiveDateTime, fps: f64) -> NaiveDateTime {
    let middle_s = (FF_NFRAMES as f64 / 2.0) / fps;
    start + Duration::microseconds((middle_s * 1e6).round() as i64)
}

/// Julian date of a UTC timestamp.
pub fn julian_date(time: NaiveDateTime) -> f64 {
    JD_UNIX_EPOCH + time.and_utc().timestamp_micros() as f64 / 86_400e6
}

/// Modified Julian date of a UTC timestamp.
pub fn mjd(time: NaiveDateTime) -> f64 {
    julian_date(time) - MJD_OFFSET
}

/// FITS-standard DATE-OBS string, e.g. `2023-01-01T00:00:00.000`.
pub fn date_obs(time: NaiveDateTime) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}
