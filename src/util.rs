use chrono::{DateTime, NaiveDateTime, Utc};

/// Seconds since the epoch, as stored in 32-bit inode timestamps.
pub fn unixtime() -> u32 {
  Utc::now().timestamp() as u32
}

pub fn format_unixtime(secs: u32) -> String {
  let naive = NaiveDateTime::from_timestamp(secs as i64, 0);
  let datetime: DateTime<Utc> = DateTime::from_utc(naive, Utc);

  datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Decimal, or hex with a `0x` prefix.
pub fn parse_osd_id(s: &str) -> Result<u64, String> {
  let s = s.trim();
  let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
    Some(hex) => u64::from_str_radix(hex, 16),
    None => s.parse::<u64>(),
  };

  parsed.map_err(|e| format!("{s}: {e}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_osd_id_works() {
    assert_eq!(parse_osd_id("256"), Ok(0x100));
    assert_eq!(parse_osd_id("0x10000"), Ok(0x10000));
    assert_eq!(parse_osd_id("0XfF"), Ok(0xff));
    assert!(parse_osd_id("0x").is_err());
    assert!(parse_osd_id("ten").is_err());
    assert!(parse_osd_id("-1").is_err());
  }

  #[test]
  fn format_unixtime_works() {
    assert_eq!(format_unixtime(0), "1970-01-01 00:00:00");
    assert_eq!(format_unixtime(1337), "1970-01-01 00:22:17");
  }

  #[test]
  fn unixtime_is_recent() {
    // 2020-01-01
    assert!(unixtime() > 1_577_836_800);
  }
}

// vim:ts=2 sw=2
