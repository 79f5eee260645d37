//! Second-precision timestamps and the clocks that produce them
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A point in time at second precision, the resolution the ledger records.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self::from_unix(Utc::now().timestamp())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    /// Out-of-range inputs clamp to the epoch.
    pub fn from_unix(secs: i64) -> Self {
        Self(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH))
    }
    /// The ledger stores unset dates as zero.
    pub fn from_ledger(secs: u64) -> Option<Self> {
        match secs {
            0 => None,
            secs => i64::try_from(secs).ok().map(Self::from_unix),
        }
    }
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }
    /// Seconds since the epoch, zero for anything before it.
    pub fn unix_seconds(&self) -> u64 {
        u64::try_from(self.unix()).unwrap_or(0)
    }
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self::from_unix(self.unix().saturating_add(secs))
    }
    /// Signed number of seconds from `earlier` to `self`.
    pub fn seconds_since(&self, earlier: &TimeStamp) -> i64 {
        self.unix().saturating_sub(earlier.unix())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_unix(value.timestamp())
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.unix())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let secs = d.i64()?;

        DateTime::from_timestamp(secs, 0)
            .map(TimeStamp)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert timestamp to utc",
            ))
    }
}

/// Source of "now". Passed explicitly so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp {
        TimeStamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<TimeStamp>>,
}

impl ManualClock {
    pub fn new(start: TimeStamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }
    pub fn set(&self, to: TimeStamp) {
        *self.now.lock() = to;
    }
    pub fn advance(&self, by: Duration) {
        let secs = i64::try_from(by.as_secs()).unwrap_or(i64::MAX);
        let mut now = self.now.lock();
        *now = now.plus_secs(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp {
        *self.now.lock()
    }
}
