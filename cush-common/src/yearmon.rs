//! Year-month period handling
//!
//! COUNTER usage is reported in whole calendar months. `YearMon` is the
//! canonical representation stored in harvest and fact rows (`YYYY-MM`)
//! and the source of the `begin_date`/`end_date` request parameters.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use crate::{Error, Result};

/// One calendar month, e.g. `2024-03`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMon {
    year: i32,
    month: u32,
}

impl YearMon {
    /// Create a year-month, validating the month number
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidInput(format!(
                "month out of range: {}",
                month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the month (SUSHI `begin_date`)
    pub fn begin_date(&self) -> NaiveDate {
        // month validated at construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
    }

    /// Last day of the month (SUSHI `end_date`)
    pub fn end_date(&self) -> NaiveDate {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 2, 1).unwrap())
            .pred_opt()
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 31).unwrap())
    }
}

impl fmt::Display for YearMon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMon {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidInput(format!("not a year-month: {:?}", s)))?;
        let year: i32 = y
            .parse()
            .map_err(|_| Error::InvalidInput(format!("not a year-month: {:?}", s)))?;
        let month: u32 = m
            .parse()
            .map_err(|_| Error::InvalidInput(format!("not a year-month: {:?}", s)))?;
        Self::new(year, month)
    }
}
