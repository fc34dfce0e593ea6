//! Consumer side of the analyzer.
//!
//! - `ResultMailbox`: latest-value handoff from the analysis thread to a
//!   presentation thread.
//! - `DisplayModel`: turns raw results into what a detection overlay shows.
//!   Results under the confidence threshold render as "no visible detection";
//!   the analyzer itself still delivers them unfiltered.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::fmt;
use std::time::Duration;

use crate::analyzer::ResultSink;
use crate::pipeline::{AnalysisResult, Prediction, Rect};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Single-slot mailbox. A new result replaces one the consumer has not taken
/// yet, so a slow presentation thread only ever sees the freshest result.
pub struct ResultMailbox {
    tx: Sender<Option<AnalysisResult>>,
    evict: Receiver<Option<AnalysisResult>>,
}

/// Presentation-side end of a `ResultMailbox`.
pub struct MailboxReceiver {
    rx: Receiver<Option<AnalysisResult>>,
}

/// Create a connected mailbox pair.
pub fn result_mailbox() -> (ResultMailbox, MailboxReceiver) {
    let (tx, rx) = bounded(1);
    (
        ResultMailbox {
            tx,
            evict: rx.clone(),
        },
        MailboxReceiver { rx },
    )
}

impl ResultSink for ResultMailbox {
    fn on_result(&mut self, result: Option<AnalysisResult>) {
        let mut result = result;
        loop {
            match self.tx.try_send(result) {
                Ok(()) => return,
                Err(TrySendError::Full(unsent)) => {
                    let _ = self.evict.try_recv();
                    result = unsent;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Outcome of waiting on the mailbox.
#[derive(Debug, PartialEq)]
pub enum Received {
    Result(Option<AnalysisResult>),
    Timeout,
    /// The analyzer has shut down and dropped its end.
    Closed,
}

impl MailboxReceiver {
    pub fn recv_timeout(&self, timeout: Duration) -> Received {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Received::Result(result),
            Err(RecvTimeoutError::Timeout) => Received::Timeout,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    pub fn try_recv(&self) -> Option<Option<AnalysisResult>> {
        self.rx.try_recv().ok()
    }
}

/// What the overlay shows for one result.
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    /// Detected item name; empty for a confident `Prediction::None`.
    pub item: String,
    /// Confidence as a percentage string, e.g. `"87.50%"`.
    pub value: String,
    /// Meter position, 0..=100.
    pub percent: u8,
    pub inference_time: String,
    pub bounding_box: Option<Rect>,
}

impl Overlay {
    /// `None` when there is no result or it is below `threshold`.
    pub fn from_result(result: Option<&AnalysisResult>, threshold: f32) -> Option<Self> {
        let result = result?;
        if result.confidence() < threshold {
            return None;
        }
        let percent = result.confidence() * 100.0;
        let (item, value) = match result.prediction() {
            Prediction::Label(label) => (label.clone(), format!("{:.2}%", percent)),
            Prediction::Region { label, .. } => (label.clone(), format!("{:.2}%", percent)),
            Prediction::None => (String::new(), String::new()),
        };
        Some(Self {
            item,
            value,
            percent: percent as u8,
            inference_time: format!("{} ms", result.process_time_ms()),
            bounding_box: result.prediction().bounding_box(),
        })
    }
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.item.is_empty() {
            write!(f, "[{:>3}%] (no label)", self.percent)?;
        } else {
            write!(f, "[{:>3}%] {} {}", self.percent, self.item, self.value)?;
        }
        if let Some(rect) = &self.bounding_box {
            write!(
                f,
                " box=({:.0},{:.0})-({:.0},{:.0})",
                rect.left, rect.top, rect.right, rect.bottom
            )?;
        }
        write!(f, " inference={}", self.inference_time)
    }
}

/// Overlay state of the presentation layer.
#[derive(Debug)]
pub struct DisplayModel {
    threshold: f32,
    current: Option<Overlay>,
}

impl DisplayModel {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            current: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Replace the overlay with the one for `result`; a missing or
    /// low-confidence result clears it.
    pub fn apply(&mut self, result: Option<&AnalysisResult>) -> Option<&Overlay> {
        self.current = Overlay::from_result(result, self.threshold);
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&Overlay> {
        self.current.as_ref()
    }
}

impl Default for DisplayModel {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}
