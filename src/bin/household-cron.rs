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

use std::io::Write as _;

use chrono::{DateTime, Local};
use clap::{CommandFactory, Parser};
use household::{
    COPYRIGHT, LONG_VERSION,
    recurring::{Frequency, format_next_execution},
};

/// Household Cron
///
/// Prints when a frequency (`daily`, `weekly`, `monthly` or
/// `custom <minute> <hour> <day of month> <month> <day of week>`) triggers
/// next, in the local time zone.
#[derive(Parser, Debug)]
#[command(long_version = LONG_VERSION, about = "Household Cron")]
struct Args {
    /// The frequency, for example 'custom 0 9 * * 1-5'
    #[arg(required_unless_present = "man")]
    frequency: Vec<String>,

    /// How many execution dates to print
    #[arg(default_value_t = 5, long)]
    count: usize,

    /// Start after this RFC 3339 date instead of now
    #[arg(long)]
    from: Option<DateTime<Local>>,

    /// Build the manpage
    #[arg(long)]
    man: bool,
}

impl Args {
    fn generate_man_page() -> anyhow::Result<()> {
        let mut buffer: Vec<u8> = Vec::default();
        let cmd = Self::command().name("household-cron").long_version(None);
        let man = clap_mangen::Man::new(cmd).date("2026-10-17");

        man.render(&mut buffer)?;
        write!(buffer, "{COPYRIGHT}")?;

        std::fs::write("household-cron.1", buffer)?;
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.man {
        return Args::generate_man_page();
    }

    let frequency: Frequency = args.frequency.join(" ").parse()?;
    let now = Local::now();
    let mut date = args.from.unwrap_or(now);

    println!("{}", frequency.description());
    for _ in 0..args.count {
        date = frequency.next_execution_date(&date)?;
        println!(
            "{}  {}",
            date.format("%a %Y-%m-%d %H:%M %Z"),
            format_next_execution(&date, &now)
        );
    }

    Ok(())
}
