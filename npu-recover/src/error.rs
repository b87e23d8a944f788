/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error and response-code types for fault recovery.
//!
//! * [`RecoverCode`]: the wire-level response code carried in
//!   [`Status`](crate::proto::Status) and returned by state handlers.
//! * [`TransitionError`]: the state machine refused an event.
//! * [`RecoverError`]: every failure of the controller and the service.
//!   Converts into `tonic::Status` at the service boundary.

use thiserror::Error;

use crate::machine::{Event, State};

// ── RecoverCode ───────────────────────────────────────────────────────────────

/// Response code shared with the training agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RecoverCode {
    Ok = 0,
    OutOfOrder = 1,
    JobNotExist = 2,
    SignalQueueBusy = 3,
    OperateConfigMapError = 4,
    OperatePodGroupError = 5,
    ClientError = 6,
    ServerInnerError = 7,
    UnRecoverableRetryError = 8,
    RecoverableRetryError = 9,
    ProcessRecoverFail = 10,
    ScheduleTimeout = 11,
}

impl RecoverCode {
    /// Unknown codes map to [`RecoverCode::ServerInnerError`].
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => RecoverCode::Ok,
            1 => RecoverCode::OutOfOrder,
            2 => RecoverCode::JobNotExist,
            3 => RecoverCode::SignalQueueBusy,
            4 => RecoverCode::OperateConfigMapError,
            5 => RecoverCode::OperatePodGroupError,
            6 => RecoverCode::ClientError,
            8 => RecoverCode::UnRecoverableRetryError,
            9 => RecoverCode::RecoverableRetryError,
            10 => RecoverCode::ProcessRecoverFail,
            11 => RecoverCode::ScheduleTimeout,
            _ => RecoverCode::ServerInnerError,
        }
    }

    pub fn is_ok(self) -> bool {
        self == RecoverCode::Ok
    }
}

// ── TransitionError ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// No rule matches `(state, event)`; the event is dropped.
    #[error("order mix: event {event} is not accepted in state {state}")]
    OrderMix { state: State, event: Event },
}

// ── RecoverError ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RecoverError {
    #[error("job '{job}' is not registered")]
    JobNotRegistered { job: String },

    #[error("job '{job}': {channel} channel is closed")]
    ChannelClosed { job: String, channel: &'static str },

    #[error("job '{job}': {channel} channel is full")]
    QueueBusy { job: String, channel: &'static str },

    #[error("job '{job}': sending on {channel} channel timed out")]
    SendTimeout { job: String, channel: &'static str },

    #[error("job '{job}': no report on {channel} channel in time")]
    ReportTimeout { job: String, channel: &'static str },

    #[error("job '{job}': operation cancelled")]
    Cancelled { job: String },

    #[error("job '{job}' is busy in state {state}")]
    Busy { job: String, state: State },

    #[error("job '{job}': {op} failed after retries: {message}")]
    Collaborator {
        job: String,
        op: &'static str,
        code: RecoverCode,
        message: String,
    },

    #[error("job '{job}': invalid request: {reason}")]
    InvalidRequest { job: String, reason: String },

    #[error(transparent)]
    Rejected(#[from] TransitionError),
}

impl RecoverError {
    /// Wire code reported back to the agent.
    pub fn code(&self) -> RecoverCode {
        match self {
            RecoverError::JobNotRegistered { .. } => RecoverCode::JobNotExist,
            RecoverError::QueueBusy { .. } => RecoverCode::SignalQueueBusy,
            RecoverError::Busy { .. } | RecoverError::Rejected(_) => RecoverCode::OutOfOrder,
            RecoverError::Collaborator { code, .. } => *code,
            RecoverError::InvalidRequest { .. } => RecoverCode::ClientError,
            RecoverError::ChannelClosed { .. }
            | RecoverError::SendTimeout { .. }
            | RecoverError::ReportTimeout { .. }
            | RecoverError::Cancelled { .. } => RecoverCode::ServerInnerError,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecoverError::Cancelled { .. })
    }
}

impl From<RecoverError> for tonic::Status {
    fn from(e: RecoverError) -> Self {
        let msg = e.to_string();
        match e {
            RecoverError::JobNotRegistered { .. } => tonic::Status::not_found(msg),
            RecoverError::QueueBusy { .. } => tonic::Status::resource_exhausted(msg),
            RecoverError::SendTimeout { .. } | RecoverError::ReportTimeout { .. } => {
                tonic::Status::deadline_exceeded(msg)
            }
            RecoverError::ChannelClosed { .. } | RecoverError::Cancelled { .. } => tonic::Status::unavailable(msg),
            RecoverError::Busy { .. } | RecoverError::Rejected(_) => tonic::Status::failed_precondition(msg),
            RecoverError::InvalidRequest { .. } => tonic::Status::invalid_argument(msg),
            RecoverError::Collaborator { .. } => tonic::Status::internal(msg),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_i32() {
        for code in [
            RecoverCode::Ok,
            RecoverCode::JobNotExist,
            RecoverCode::ProcessRecoverFail,
            RecoverCode::ScheduleTimeout,
        ] {
            assert_eq!(RecoverCode::from_i32(code as i32), code);
        }
        assert_eq!(RecoverCode::from_i32(999), RecoverCode::ServerInnerError);
    }

    #[test]
    fn errors_map_to_grpc_status() {
        let s: tonic::Status = RecoverError::JobNotRegistered { job: "j".into() }.into();
        assert_eq!(s.code(), tonic::Code::NotFound);

        let s: tonic::Status = RecoverError::Rejected(TransitionError::OrderMix {
            state: State::Init,
            event: Event::ReceiveReport,
        })
        .into();
        assert_eq!(s.code(), tonic::Code::FailedPrecondition);
        assert!(s.message().contains("order mix"));
    }

    #[test]
    fn collaborator_error_keeps_its_code() {
        let e = RecoverError::Collaborator {
            job: "j".into(),
            op: "write reset configmap",
            code: RecoverCode::OperateConfigMapError,
            message: "boom".into(),
        };
        assert_eq!(e.code(), RecoverCode::OperateConfigMapError);
    }
}
