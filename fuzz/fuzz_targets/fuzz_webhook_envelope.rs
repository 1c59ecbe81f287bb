#![no_main]

use libfuzzer_sys::fuzz_target;

use switchboard::calls::{peek_telnyx_call_id, CallEvent};
use switchboard::webhooks::twilio::parse_form;

// Webhook bodies arrive from the network before any signature check; parsing
// them must never panic.
fuzz_target!(|data: &[u8]| {
    let peeked = peek_telnyx_call_id(data);
    if let Ok(event) = CallEvent::from_telnyx(data) {
        assert_eq!(peeked.as_deref(), Some(event.provider_call_id.as_str()));
        let _ = event.leg_role();
        let _ = event.failure_reason();
    }

    let params = parse_form(data);
    if let Ok(event) = CallEvent::from_twilio_form(&params) {
        assert!(!event.provider_call_id.is_empty());
    }
});
