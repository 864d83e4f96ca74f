// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use interned_strings::InternError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("allocation failed")]
    AllocFailure,
    #[error("data is not loaded")]
    NotLoaded,
    #[error("index {index} out of range for {len} records")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid or stale handle")]
    InvalidHandle,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("property has a different type")]
    InvalidType,
    #[error("timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("database error: {0}")]
    Database(String),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub fn code(&self) -> ResultCode {
        match self {
            Error::AllocFailure => ResultCode::AllocFailure,
            Error::NotLoaded => ResultCode::NotLoaded,
            Error::IndexOutOfRange { .. } => ResultCode::IndexOutOfRange,
            Error::InvalidHandle => ResultCode::InvalidHandle,
            Error::InvalidArgument(_) => ResultCode::InvalidArgument,
            Error::InvalidType => ResultCode::InvalidType,
            Error::Timeout => ResultCode::Timeout,
            Error::Cancelled => ResultCode::Cancelled,
            Error::Database(_) => ResultCode::DatabaseError,
        }
    }
}

impl From<InternError> for Error {
    fn from(_: InternError) -> Self {
        Error::AllocFailure
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Flat status code for callers that only need the outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    AllocFailure,
    NotLoaded,
    IndexOutOfRange,
    InvalidHandle,
    InvalidArgument,
    InvalidType,
    Timeout,
    Cancelled,
    DatabaseError,
}

impl<T> From<&Result<T>> for ResultCode {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ResultCode::Success,
            Err(e) => e.code(),
        }
    }
}
