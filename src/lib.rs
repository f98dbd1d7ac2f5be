//! A recurring payment scheduler and a kart tournament bracket engine.
//!
//! ## Feature Flags
//!
//! By default the `server` feature flag is enabled.
//!
//! * bench - enable the criterion benchmarks
//! * server - enable the `household-server` binary
//!
//! ## Message Protocol
//!
//! The server speaks a line based [message protocol].
//!
//! [message protocol]: message::Message

// This file is part of household.
//
// household is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// household is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

#![deny(clippy::panic)]

pub mod cron;
pub mod message;
pub mod payment;
pub mod recurring;
pub mod scheduler;
pub mod store;
pub mod tournament;
pub mod utils;

pub type Id = u64;
pub const HOME: &str = "household";
pub const DATA_FILE: &str = "household.ron";
pub const SERVER_PORT: u16 = 49153;

pub const COPYRIGHT: &str = r".SH COPYRIGHT
Copyright (C) 2026 Developers of the household project

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.
";

pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "
Copyright (c) 2026 Developers of the household project
Licensed under the AGPLv3"
);
