// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("digest error: {0}")]
    Digest(#[from] crate::digest::DigestError),
    #[error("event log error: {0}")]
    EventLog(#[from] crate::eventlog::EventLogError),
    #[error("IMA log error: {0}")]
    Ima(#[from] crate::eventlog::ima::ImaError),
    #[error("EFI structure error: {0}")]
    Efi(#[from] crate::eventlog::efi::EfiError),
    #[error("Windows boot log error: {0}")]
    WinLog(#[from] crate::eventlog::windows::WinLogError),
    #[error("secure boot state error: {0}")]
    SecureBoot(#[from] crate::eventlog::secure_boot::SecureBootError),
    #[error("ME event error: {0}")]
    Csme(#[from] crate::eventlog::csme::CsmeError),
    #[error("evidence error: {0}")]
    Subject(#[from] crate::subject::SubjectError),
    #[error("serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("text decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("number parsing error: {0}")]
    NumParse(#[from] std::num::ParseIntError),
    #[error("hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
