//! Integration tests for nasbackup-remote
//!
//! Uses wiremock to simulate the NAS API and verifies request shapes,
//! response parsing and error mapping of `HttpRemoteDrive`.

mod common;

mod test_directories;
mod test_drives;
mod test_upload;
