// Copyright 2025 chronodb contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::TryReserveError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("accept error: {0}")]
    Accept(String),

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// wire protocol errors
    #[error("malformed package: {0}")]
    MalformedPackage(String),

    /// raised when growing an accumulation buffer fails; the affected
    /// connection must be torn down instead of reading further
    #[error("buffer allocation failed: {0}")]
    BufferExhausted(#[from] TryReserveError),
}
