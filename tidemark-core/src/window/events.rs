use super::*;

/// Lifecycle of a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaneState {
    /// The watermark has not reached the end of the interval.
    Incomplete,
    /// The watermark passed the end; late tuples still trigger.
    Complete,
    /// The discard age has passed; the pane accepts nothing more.
    Closed,
}

/// When a trigger fired relative to the pane becoming complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaneTiming {
    Early,
    OnComplete,
    Late,
}

/// What a handler sees about the pane that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerInfo {
    pub start_time: EventTime,
    pub end_time: EventTime,
    pub pane_timing: PaneTiming,
    /// Number of triggers fired by this pane before this one.
    pub pane_index: u64,
}

/// Callbacks fired by a [`TimeIntervalWindow`]. Every method defaults to a
/// no-op, so handlers implement only the events they care about.
///
/// An error returned from a callback aborts the window operation in progress
/// and is passed to the caller.
#[allow(unused_variables)]
pub trait WindowEventHandler<T, P> {
    fn before_tuple_insertion(
        &mut self,
        pane: &TimeIntervalWindowPane<T, P>,
        tuple: &T,
        partition: &P,
    ) -> Result<()> {
        Ok(())
    }

    fn after_tuple_insertion(
        &mut self,
        pane: &TimeIntervalWindowPane<T, P>,
        tuple: &T,
        partition: &P,
    ) -> Result<()> {
        Ok(())
    }

    /// The pane became complete. Fired once per partition.
    fn on_window_initial_full(
        &mut self,
        pane: &TimeIntervalWindowPane<T, P>,
        partition: &P,
    ) -> Result<()> {
        Ok(())
    }

    /// A partition of a complete pane has data not yet triggered on.
    fn on_window_trigger(
        &mut self,
        pane: &TimeIntervalWindowPane<T, P>,
        partition: &P,
    ) -> Result<()> {
        Ok(())
    }

    /// The pane is about to close. Fired once per partition.
    fn before_window_close(
        &mut self,
        pane: &TimeIntervalWindowPane<T, P>,
        partition: &P,
    ) -> Result<()> {
        Ok(())
    }

    /// Save handler state after the window state.
    fn on_checkpoint(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        Ok(())
    }

    fn on_reset(&mut self, ckpt: &mut Checkpoint) -> Result<()> {
        Ok(())
    }

    fn on_reset_to_initial_state(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T, P> WindowEventHandler<T, P> for () {}
