use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::{AppointmentError, BookAppointmentRequest};

/// Bookable slots, in display order.
pub const TIME_SLOTS: [&str; 12] = [
    "09:00 AM", "09:30 AM", "10:00 AM", "10:30 AM",
    "11:00 AM", "11:30 AM", "02:00 PM", "02:30 PM",
    "03:00 PM", "03:30 PM", "04:00 PM", "04:30 PM",
];

const SLOT_FORMAT: &str = "%I:%M %p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    Hospital,
    Department,
    Doctor,
    Schedule,
    Confirm,
}

impl BookingStep {
    pub const ALL: [BookingStep; 5] = [
        BookingStep::Hospital,
        BookingStep::Department,
        BookingStep::Doctor,
        BookingStep::Schedule,
        BookingStep::Confirm,
    ];

    pub fn number(self) -> u8 {
        match self {
            BookingStep::Hospital => 1,
            BookingStep::Department => 2,
            BookingStep::Doctor => 3,
            BookingStep::Schedule => 4,
            BookingStep::Confirm => 5,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            BookingStep::Hospital => "Hospital",
            BookingStep::Department => "Department",
            BookingStep::Doctor => "Doctor",
            BookingStep::Schedule => "Schedule",
            BookingStep::Confirm => "Confirm",
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.number() as usize).copied()
    }

    pub fn previous(self) -> Option<Self> {
        (self.number() as usize)
            .checked_sub(2)
            .and_then(|i| Self::ALL.get(i).copied())
    }
}

/// Selections collected by the booking flow so far.
#[derive(Debug, Clone, Default)]
pub struct BookingDraft {
    pub hospital_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub time_slot: Option<String>,
}

/// A draft with every selection present and the slot resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingSelection {
    pub hospital_id: Uuid,
    pub department_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub slot: &'static str,
}

impl From<&BookAppointmentRequest> for BookingDraft {
    fn from(request: &BookAppointmentRequest) -> Self {
        Self {
            hospital_id: request.hospital_id,
            department_id: request.department_id,
            doctor_id: request.doctor_id,
            date: request.appointment_date,
            time_slot: request
                .time_slot
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

impl BookingDraft {
    pub fn is_step_complete(&self, step: BookingStep) -> bool {
        match step {
            BookingStep::Hospital => self.hospital_id.is_some(),
            BookingStep::Department => self.department_id.is_some(),
            BookingStep::Doctor => self.doctor_id.is_some(),
            BookingStep::Schedule => self.date.is_some() && self.time_slot.is_some(),
            BookingStep::Confirm => false,
        }
    }

    /// First step still missing a selection, or `Confirm` once all are made.
    pub fn current_step(&self) -> BookingStep {
        BookingStep::ALL
            .into_iter()
            .find(|step| !self.is_step_complete(*step))
            .unwrap_or(BookingStep::Confirm)
    }

    pub fn validate(&self) -> Result<BookingSelection, AppointmentError> {
        let (Some(hospital_id), Some(department_id), Some(doctor_id), Some(date), Some(slot)) = (
            self.hospital_id,
            self.department_id,
            self.doctor_id,
            self.date,
            self.time_slot.as_deref(),
        ) else {
            debug!("Booking incomplete at step {}", self.current_step().title());
            return Err(AppointmentError::IncompleteSelection);
        };

        let (slot, time) = parse_time_slot(slot)?;

        Ok(BookingSelection {
            hospital_id,
            department_id,
            doctor_id,
            date,
            time,
            slot,
        })
    }
}

fn slot_times() -> impl Iterator<Item = (&'static str, NaiveTime)> {
    TIME_SLOTS
        .iter()
        .filter_map(|slot| NaiveTime::parse_from_str(slot, SLOT_FORMAT).ok().map(|t| (*slot, t)))
}

/// Resolves a slot label or 24h time to one of the bookable slots.
pub fn parse_time_slot(input: &str) -> Result<(&'static str, NaiveTime), AppointmentError> {
    let input = input.trim();

    let requested = NaiveTime::parse_from_str(input, SLOT_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M"))
        .map_err(|_| AppointmentError::InvalidTimeSlot(input.to_string()))?;

    slot_times()
        .find(|(_, time)| *time == requested)
        .ok_or_else(|| AppointmentError::InvalidTimeSlot(input.to_string()))
}
