use std::collections::HashSet;

use chrono::{Datelike, Months, NaiveDate};

use super::task::Task;

/// Months kept on each side of the current one.
const MONTHS_BACK: u32 = 12;
const MONTHS_AHEAD: u32 = 11;

/// One month of the calendar laid out as Monday-first weeks.
/// Days outside the month are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarMonth {
    pub first: NaiveDate,
    pub weeks: Vec<[Option<NaiveDate>; 7]>,
}

impl CalendarMonth {
    pub fn new(first: NaiveDate) -> Self {
        let first = first_of_month(first);
        let year = first.year();
        let month = first.month();

        let weekday_offset = first.weekday().num_days_from_monday();
        let grid_start = first - chrono::Duration::days(i64::from(weekday_offset));

        let mut weeks = Vec::with_capacity(6);
        for week in 0..6 {
            let mut days = [None; 7];
            let mut any_in_month = false;
            for (day_of_week, slot) in days.iter_mut().enumerate() {
                let date = grid_start + chrono::Duration::days(week * 7 + day_of_week as i64);
                if date.month() == month && date.year() == year {
                    *slot = Some(date);
                    any_in_month = true;
                }
            }
            if any_in_month {
                weeks.push(days);
            }
        }

        Self { first, weeks }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.weeks.iter().flatten().filter_map(|d| *d)
    }

    pub fn label(&self) -> String {
        self.first.format("%B %Y").to_string()
    }
}

/// The two-year rolling window the calendar can browse, plus the
/// month currently shown and the selected day.
#[derive(Debug, Clone)]
pub struct CalendarWindow {
    start: NaiveDate,
    end: NaiveDate,
    pub displayed_month: NaiveDate,
    pub selected_day: Option<NaiveDate>,
}

impl CalendarWindow {
    pub fn around(today: NaiveDate) -> Self {
        let current = first_of_month(today);
        let start = current
            .checked_sub_months(Months::new(MONTHS_BACK))
            .unwrap_or(current);
        let end = current
            .checked_add_months(Months::new(MONTHS_AHEAD + 1))
            .and_then(|d| d.pred_opt())
            .unwrap_or(today);
        Self {
            start,
            end,
            displayed_month: current,
            selected_day: Some(today),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Materialize every month in the window, oldest first.
    pub fn months(&self) -> Vec<CalendarMonth> {
        let mut months = Vec::new();
        let mut first = self.start;
        while first <= self.end {
            months.push(CalendarMonth::new(first));
            match first.checked_add_months(Months::new(1)) {
                Some(next) => first = next,
                None => break,
            }
        }
        months
    }

    pub fn displayed(&self) -> CalendarMonth {
        CalendarMonth::new(self.displayed_month)
    }

    /// Dates inside the window that carry at least one task.
    pub fn busy_days(&self, tasks: &[Task]) -> HashSet<NaiveDate> {
        tasks
            .iter()
            .filter_map(|t| t.due_date)
            .filter(|d| self.contains(*d))
            .collect()
    }

    pub fn prev_month(&mut self) {
        if let Some(prev) = self.displayed_month.checked_sub_months(Months::new(1)) {
            if prev >= self.start {
                self.displayed_month = prev;
                self.selected_day = None;
            }
        }
    }

    pub fn next_month(&mut self) {
        if let Some(next) = self.displayed_month.checked_add_months(Months::new(1)) {
            if next <= self.end {
                self.displayed_month = next;
                self.selected_day = None;
            }
        }
    }

    /// Jump to the month holding `date`; ignored outside the window.
    pub fn show(&mut self, date: NaiveDate) {
        if self.contains(date) {
            self.displayed_month = first_of_month(date);
        }
    }

    pub fn select_day(&mut self, date: NaiveDate) {
        if !self.contains(date) {
            return;
        }
        if self.selected_day == Some(date) {
            self.selected_day = None;
        } else {
            self.selected_day = Some(date);
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}
