//! Fixed sequences of stream operations and the records they produce.
//!
//! Every scenario is driven from the calling thread. Reads may be begun and
//! left outstanding so that later steps overlap with them. Nothing is
//! retried: a failing step is recorded with its status and the scenario
//! carries on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::operation::ReadHandle;
use crate::resolver::StreamResolver;
use crate::{ByteStream, Result, Status};

const BUFFER_SLACK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Seek,
    Read,
    BeginRead,
    EndRead,
    Close,
    Capabilities,
    Length,
    EndOfStream,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Seek => "seek",
            Operation::Read => "read",
            Operation::BeginRead => "begin_read",
            Operation::EndRead => "end_read",
            Operation::Close => "close",
            Operation::Capabilities => "capabilities",
            Operation::Length => "length",
            Operation::EndOfStream => "is_eof",
        };
        f.write_str(name)
    }
}

/// Outcome of a single scenario step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub operation: Operation,
    /// Distinguishes overlapping reads within one scenario.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<u32>,
    /// Seek target or requested read length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<i64>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<usize>,
    /// Value returned by a query step (capabilities bits, length).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
    pub position_before: u64,
    pub position_after: u64,
    pub is_eof: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub stream_id: u64,
    pub length: u64,
    pub steps: Vec<StepRecord>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    ReadAcrossEnd,
    SeekPastEnd,
    ReadsUpToEnd,
    ReadFromStart,
    ReadThenSeek,
    DoubleBeginRead,
    DoubleBeginReadSeek,
    NegativeSeek,
    CloseDuringRead,
}

impl Scenario {
    pub const ALL: [Scenario; 9] = [
        Scenario::ReadAcrossEnd,
        Scenario::SeekPastEnd,
        Scenario::ReadsUpToEnd,
        Scenario::ReadFromStart,
        Scenario::ReadThenSeek,
        Scenario::DoubleBeginRead,
        Scenario::DoubleBeginReadSeek,
        Scenario::NegativeSeek,
        Scenario::CloseDuringRead,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::ReadAcrossEnd => "read_across_end",
            Scenario::SeekPastEnd => "seek_past_end",
            Scenario::ReadsUpToEnd => "reads_up_to_end",
            Scenario::ReadFromStart => "read_from_start",
            Scenario::ReadThenSeek => "read_then_seek",
            Scenario::DoubleBeginRead => "double_begin_read",
            Scenario::DoubleBeginReadSeek => "double_begin_read_seek",
            Scenario::NegativeSeek => "negative_seek",
            Scenario::CloseDuringRead => "close_during_read",
        }
    }

    /// Whether the scenario must start on a stream nobody has touched.
    pub fn needs_fresh_stream(&self) -> bool {
        matches!(self, Scenario::CloseDuringRead)
    }

    pub fn run(&self, stream: &ByteStream) -> ScenarioReport {
        log::info!("scenario/{}: running on stream/{}", self, stream.id());
        let mut runner = ScenarioRunner::new(stream);
        // Seek targets saturate; a reported length beyond i64 is clamped.
        let length = i64::try_from(stream.length()).unwrap_or(i64::MAX);
        match self {
            Scenario::ReadAcrossEnd => {
                runner.seek(length.saturating_sub(10));
                runner.read(20);
            }
            Scenario::SeekPastEnd => {
                runner.seek(length.saturating_mul(2));
                runner.read(10);
                runner.read(10);
            }
            Scenario::ReadsUpToEnd => {
                runner.seek(length.saturating_sub(30));
                for _ in 0..4 {
                    runner.read(10);
                }
            }
            Scenario::ReadFromStart => {
                runner.seek(0);
                runner.read(10);
            }
            Scenario::ReadThenSeek => {
                let target = i64::try_from(stream.position())
                    .unwrap_or(i64::MAX)
                    .saturating_add(50);
                let handle = runner.begin_read(1, 10);
                runner.seek(target);
                runner.end_read(1, handle);
            }
            Scenario::DoubleBeginRead => {
                let first = runner.begin_read(1, 10);
                let second = runner.begin_read(2, 10);
                runner.end_read(1, first);
                runner.end_read(2, second);
            }
            Scenario::DoubleBeginReadSeek => {
                let first = runner.begin_read(1, 10);
                let second = runner.begin_read(2, 10);
                runner.seek(500);
                runner.end_read(1, first);
                runner.end_read(2, second);
            }
            Scenario::NegativeSeek => {
                runner.seek(-100);
                for length in [0, 10, 190, 10, 0] {
                    runner.read(length);
                }
                runner.seek(length.saturating_sub(10));
                runner.read(20);
            }
            Scenario::CloseDuringRead => {
                runner.read(500);
                let handle = runner.begin_read(1, 100_000);
                runner.close();
                runner.end_read(1, handle);
                runner.end_of_stream();
                runner.read(20);
                runner.seek(100);
                runner.capabilities();
                runner.length();
                runner.end_of_stream();
            }
        }
        ScenarioReport {
            scenario: *self,
            stream_id: stream.id(),
            length: stream.length(),
            steps: runner.finish(),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| format!("unknown scenario '{s}'"))
    }
}

/// Issues operations against one stream and records each of them.
pub struct ScenarioRunner<'a> {
    stream: &'a ByteStream,
    steps: Vec<StepRecord>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(stream: &'a ByteStream) -> Self {
        Self {
            stream,
            steps: Vec::new(),
        }
    }

    pub fn seek(&mut self, target: i64) {
        let before = self.stream.position();
        let status = Status::from(&self.stream.set_position(target));
        let requested = Some(target);
        self.record(
            Operation::Seek,
            None,
            requested,
            status,
            None,
            None,
            before,
        );
    }

    /// Begin a read and finalize it straight away.
    pub fn read(&mut self, length: usize) {
        let before = self.stream.position();
        let (status, bytes) = match self
            .stream
            .begin_read(vec![0; length], length)
            .and_then(|handle| self.stream.end_read(handle))
        {
            Ok(completion) => (completion.status, Some(completion.bytes_read)),
            Err(err) => (Status::from(&err), None),
        };
        let requested = Some(length as i64);
        self.record(
            Operation::Read,
            None,
            requested,
            status,
            bytes,
            None,
            before,
        );
    }

    /// Begin a read and leave it outstanding. A rejected read is recorded
    /// and yields no handle.
    pub fn begin_read(&mut self, tag: u32, length: usize) -> Option<ReadHandle> {
        let before = self.stream.position();
        let buffer = vec![0; length + BUFFER_SLACK];
        let result = self.stream.begin_read(buffer, length);
        let status = Status::from(&result);
        let requested = Some(length as i64);
        self.record(
            Operation::BeginRead,
            Some(tag),
            requested,
            status,
            None,
            None,
            before,
        );
        result.ok()
    }

    /// Finalize a read begun with [`ScenarioRunner::begin_read`]. Nothing is
    /// recorded if the read was never accepted.
    pub fn end_read(&mut self, tag: u32, handle: Option<ReadHandle>) {
        let Some(handle) = handle else {
            log::debug!("scenario: read {} was never begun", tag);
            return;
        };
        let before = self.stream.position();
        let requested = Some(handle.requested() as i64);
        let (status, bytes) = match self.stream.end_read(handle) {
            Ok(completion) => (completion.status, Some(completion.bytes_read)),
            Err(err) => (Status::from(&err), None),
        };
        self.record(
            Operation::EndRead,
            Some(tag),
            requested,
            status,
            bytes,
            None,
            before,
        );
    }

    pub fn close(&mut self) {
        let before = self.stream.position();
        self.stream.close();
        self.record(
            Operation::Close,
            None,
            None,
            Status::Ok,
            None,
            None,
            before,
        );
    }

    pub fn capabilities(&mut self) {
        let before = self.stream.position();
        let bits = u64::from(self.stream.capabilities().bits());
        self.record(
            Operation::Capabilities,
            None,
            None,
            Status::Ok,
            None,
            Some(bits),
            before,
        );
    }

    pub fn length(&mut self) {
        let before = self.stream.position();
        let length = self.stream.length();
        self.record(
            Operation::Length,
            None,
            None,
            Status::Ok,
            None,
            Some(length),
            before,
        );
    }

    pub fn end_of_stream(&mut self) {
        let before = self.stream.position();
        let eof = u64::from(self.stream.is_end_of_stream());
        self.record(
            Operation::EndOfStream,
            None,
            None,
            Status::Ok,
            None,
            Some(eof),
            before,
        );
    }

    pub fn finish(self) -> Vec<StepRecord> {
        self.steps
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        operation: Operation,
        tag: Option<u32>,
        requested: Option<i64>,
        status: Status,
        bytes_transferred: Option<usize>,
        value: Option<u64>,
        position_before: u64,
    ) {
        let step = StepRecord {
            operation,
            tag,
            requested,
            status,
            bytes_transferred,
            value,
            position_before,
            position_after: self.stream.position(),
            is_eof: self.stream.is_end_of_stream(),
        };
        log::debug!("scenario: {:?}", step);
        self.steps.push(step);
    }
}

/// Run `scenarios` in order against streams obtained from `resolver`.
///
/// Scenarios share one stream, the way a single probe session would. A new
/// stream is resolved when the current one is poisoned or closed, or when a
/// scenario needs a fresh one. Only resolution failures abort the run.
pub fn run_scenarios<R: StreamResolver + ?Sized>(
    resolver: &R,
    uri: &str,
    scenarios: &[Scenario],
) -> Result<Vec<ScenarioReport>> {
    let mut reports = Vec::with_capacity(scenarios.len());
    let mut stream: Option<ByteStream> = None;

    for scenario in scenarios {
        let reusable = stream.as_ref().map_or(false, |current| {
            !scenario.needs_fresh_stream()
                && !current.is_poisoned()
                && current.lifecycle() == crate::Lifecycle::Open
        });
        if !reusable {
            if let Some(old) = stream.take() {
                log::info!("scenario: replacing stream/{}", old.id());
                old.close();
            }
            stream = Some(resolver.resolve(uri)?);
        }
        if let Some(current) = stream.as_ref() {
            reports.push(scenario.run(current));
        }
    }

    if let Some(current) = stream {
        current.close();
    }
    Ok(reports)
}

/// Run every scenario in the canonical order.
pub fn run_all<R: StreamResolver + ?Sized>(
    resolver: &R,
    uri: &str,
) -> Result<Vec<ScenarioReport>> {
    run_scenarios(resolver, uri, &Scenario::ALL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform;
    use crate::source::{ByteSource, Capabilities, ReadFuture};
    use crate::ProbeError;
    use rstest::rstest;
    use std::sync::Arc;

    /// Claims an enormous size, as a remote server might, and serves zeros.
    struct HugeSource(u64);

    impl ByteSource for HugeSource {
        fn total_size(&self) -> u64 {
            self.0
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::READABLE | Capabilities::SEEKABLE | Capabilities::REMOTE
        }

        fn read_range(&self, _offset: u64, length: u64) -> ReadFuture<'_> {
            Box::pin(async move { Ok::<_, ProbeError>(vec![0; length as usize]) })
        }

        fn source_id(&self) -> &str {
            "huge"
        }
    }

    fn huge_stream(length: u64) -> ByteStream {
        platform::startup().unwrap();
        ByteStream::new(Arc::new(HugeSource(length))).unwrap()
    }

    #[rstest]
    #[case(u64::MAX / 2)]
    #[case(u64::MAX)]
    fn huge_lengths_never_poison(#[case] length: u64) {
        let stream = huge_stream(length);
        for scenario in [
            Scenario::ReadAcrossEnd,
            Scenario::SeekPastEnd,
            Scenario::ReadsUpToEnd,
            Scenario::ReadThenSeek,
        ] {
            let report = scenario.run(&stream);
            assert!(
                report.steps.iter().all(|s| s.status == Status::Ok),
                "{scenario}: {:?}",
                report.steps
            );
        }
        assert!(!stream.is_poisoned());
    }

    #[test]
    fn seek_past_huge_end_lands_on_end() {
        let length = u64::MAX / 2;
        let stream = huge_stream(length);
        let report = Scenario::SeekPastEnd.run(&stream);
        assert_eq!(report.steps[0].requested, Some(i64::MAX));
        assert_eq!(report.steps[0].position_after, length);
        assert_eq!(report.steps[1].bytes_transferred, Some(0));
    }

    #[test]
    fn scenario_names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>(), Ok(scenario));
        }
        assert!("sideways".parse::<Scenario>().is_err());
    }
}
