//! Integration tests for clinicsync-remote
//!
//! Uses wiremock to simulate a PostgREST endpoint and verifies requests,
//! response decoding and error classification of the RestRemoteStore.


mod test_errors;
mod test_mutations;
