// Copyright 2024 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use chrono::{DateTime, TimeZone, Utc};

#[inline(always)]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[inline(always)]
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Hour bucket `yyyyMMdd_HH` for a record time in nanoseconds since epoch.
#[inline(always)]
pub fn hour_bucket(time_nanos: i64) -> String {
    Utc.timestamp_nanos(time_nanos).format("%Y%m%d_%H").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_bucket() {
        // 2024-01-01T00:30:00Z
        let nanos = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 30, 0)
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap();
        assert_eq!(hour_bucket(nanos), "20240101_00");
        assert_eq!(hour_bucket(0), "19700101_00");
    }
}
