// netsweep: Reproducible Network-Impairment Experiments on Emulated Hosts
// Copyright (C) 2024-2025 The netsweep authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Timestamps used to name experiment groups, in `YYYY-MM-DD_HH-mm-SS` format.

use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime};

const GROUP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");

/// Produces a timestamp `String` of the current time in YYYY-MM-DD_HH-mm-SS format.
pub fn get_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_timestamp(PrimitiveDateTime::new(now.date(), now.time()))
}

/// Format a point in time the same way `get_timestamp` does.
pub fn format_timestamp(t: PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}_{:02}-{:02}-{:02}",
        t.year(),
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

/// Parse a timestamp produced by `get_timestamp` (e.g., an experiment group directory name).
pub fn parse_timestamp(s: impl AsRef<str>) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(s.as_ref(), GROUP_FORMAT)
}
