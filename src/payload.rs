//! Payload aggregation.
//!
//! Absorbs queued events into a per-user summary and renders the summary
//! into the flat field list a delivery worker or remote peer receives.

use crate::forms::{self, convert_count, parse_form, DataForm, FieldSpec, ParseResult};
use crate::models::{NotifyConfig, PayloadSummary, Stanza, SummaryField, COUNTER_CAP};

/// Increment a summary counter, wrapping to 1 past the cap. The counter
/// never returns to 0 through increments; 0 means "nothing pending".
pub fn saturating_bump(value: u32, cap: u32) -> u32 {
    if value >= cap {
        1
    } else {
        value + 1
    }
}

/// Merge one queued event into the summary. Returns whether the summary
/// changed; unrecognized stanza kinds leave it untouched and must not
/// trigger a dispatch.
pub fn absorb(summary: &mut PayloadSummary, sender: &str, stanza: &Stanza) -> bool {
    match stanza {
        Stanza::Message { body } => {
            summary.message_count = saturating_bump(summary.message_count, COUNTER_CAP);
            summary.last_message_sender = Some(sender.to_string());
            // A bodyless message still counts; the body field records the
            // empty string.
            summary.last_message_body = Some(body.clone().unwrap_or_default());
            true
        }
        Stanza::Presence { presence_type } => {
            if presence_type.as_deref() != Some("subscribe") {
                return false;
            }
            summary.pending_subscription_count =
                saturating_bump(summary.pending_subscription_count, COUNTER_CAP);
            summary.last_subscription_sender = Some(sender.to_string());
            true
        }
        Stanza::Other => false,
    }
}

/// Project the summary into an ordered field list under a configuration.
/// Disabled fields and absent values are omitted; a zero counter counts as
/// absent.
pub fn render(summary: &PayloadSummary, config: NotifyConfig) -> Vec<SummaryField> {
    let mut fields = Vec::new();

    if config.include_message_count && summary.message_count > 0 {
        fields.push(SummaryField::new(
            forms::KEY_MESSAGE_COUNT,
            summary.message_count.to_string(),
        ));
    }
    if config.include_senders {
        if let Some(sender) = &summary.last_message_sender {
            fields.push(SummaryField::new(forms::KEY_LAST_MESSAGE_SENDER, sender));
        }
    }
    if config.include_message_bodies {
        if let Some(body) = &summary.last_message_body {
            fields.push(SummaryField::new(forms::KEY_LAST_MESSAGE_BODY, body));
        }
    }
    if config.include_subscription_count && summary.pending_subscription_count > 0 {
        fields.push(SummaryField::new(
            forms::KEY_PENDING_SUBSCRIPTION_COUNT,
            summary.pending_subscription_count.to_string(),
        ));
    }
    if config.include_senders {
        if let Some(sender) = &summary.last_subscription_sender {
            fields.push(SummaryField::new(
                forms::KEY_LAST_SUBSCRIPTION_SENDER,
                sender,
            ));
        }
    }

    fields
}

/// Outcome of decoding a summary form received from a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryDecode {
    /// A summary form was present and decoded.
    Summary(PayloadSummary),
    /// No summary form among the candidates.
    Absent,
    /// A summary form was present but malformed.
    Malformed,
}

/// Decode a remote-origin summary form. All five fields are optional; a
/// non-numeric counter makes the whole form malformed.
pub fn decode_summary(candidates: &[DataForm]) -> SummaryDecode {
    let optional = [
        FieldSpec::converted(forms::KEY_MESSAGE_COUNT, convert_count),
        FieldSpec::single(forms::KEY_LAST_MESSAGE_SENDER),
        FieldSpec::single(forms::KEY_LAST_MESSAGE_BODY),
        FieldSpec::converted(forms::KEY_PENDING_SUBSCRIPTION_COUNT, convert_count),
        FieldSpec::single(forms::KEY_LAST_SUBSCRIPTION_SENDER),
    ];

    match parse_form(candidates, forms::SUMMARY_FORM_TYPE, &[], &optional) {
        ParseResult::NotFound => SummaryDecode::Absent,
        ParseResult::Error => SummaryDecode::Malformed,
        ParseResult::Values(values) => {
            let summary = PayloadSummary {
                message_count: values
                    .get(forms::KEY_MESSAGE_COUNT)
                    .and_then(|v| v.as_count())
                    .unwrap_or(0),
                last_message_sender: values
                    .get(forms::KEY_LAST_MESSAGE_SENDER)
                    .and_then(|v| v.as_text())
                    .map(str::to_string),
                last_message_body: values
                    .get(forms::KEY_LAST_MESSAGE_BODY)
                    .and_then(|v| v.as_text())
                    .map(str::to_string),
                pending_subscription_count: values
                    .get(forms::KEY_PENDING_SUBSCRIPTION_COUNT)
                    .and_then(|v| v.as_count())
                    .unwrap_or(0),
                last_subscription_sender: values
                    .get(forms::KEY_LAST_SUBSCRIPTION_SENDER)
                    .and_then(|v| v.as_text())
                    .map(str::to_string),
            };
            SummaryDecode::Summary(summary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: Option<&str>) -> Stanza {
        Stanza::Message {
            body: body.map(str::to_string),
        }
    }

    #[test]
    fn saturating_bump_wraps_to_one_past_cap() {
        let cap = 5;
        let mut count = 0;
        for _ in 0..cap {
            count = saturating_bump(count, cap);
        }
        assert_eq!(count, cap);

        // One more application wraps to 1, never 0.
        count = saturating_bump(count, cap);
        assert_eq!(count, 1);
    }

    #[test]
    fn absorb_message_records_sender_and_body() {
        let mut summary = PayloadSummary::default();
        let changed = absorb(&mut summary, "bob@example.com", &message(Some("hi")));

        assert!(changed);
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.last_message_sender.as_deref(), Some("bob@example.com"));
        assert_eq!(summary.last_message_body.as_deref(), Some("hi"));
    }

    #[test]
    fn absorb_bodyless_message_counts_with_empty_body() {
        let mut summary = PayloadSummary::default();
        assert!(absorb(&mut summary, "bob@example.com", &message(None)));
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.last_message_body.as_deref(), Some(""));
    }

    #[test]
    fn absorb_subscribe_presence_counts_requester() {
        let mut summary = PayloadSummary::default();
        let stanza = Stanza::Presence {
            presence_type: Some("subscribe".to_string()),
        };

        assert!(absorb(&mut summary, "carol@example.com", &stanza));
        assert_eq!(summary.pending_subscription_count, 1);
        assert_eq!(
            summary.last_subscription_sender.as_deref(),
            Some("carol@example.com")
        );
        assert_eq!(summary.message_count, 0);
    }

    #[test]
    fn absorb_ignores_other_presence_and_unknown_kinds() {
        let mut summary = PayloadSummary::default();

        let unavailable = Stanza::Presence {
            presence_type: Some("unavailable".to_string()),
        };
        assert!(!absorb(&mut summary, "bob@example.com", &unavailable));
        assert!(!absorb(&mut summary, "bob@example.com", &Stanza::Other));
        assert!(summary.is_empty());
    }

    #[test]
    fn render_omits_disabled_and_absent_fields() {
        let mut summary = PayloadSummary::default();
        absorb(&mut summary, "bob@example.com", &message(Some("hi")));

        let config = NotifyConfig {
            include_senders: true,
            include_message_count: true,
            include_subscription_count: true,
            include_message_bodies: false,
        };
        let fields = render(&summary, config);

        let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![forms::KEY_MESSAGE_COUNT, forms::KEY_LAST_MESSAGE_SENDER]
        );
        assert_eq!(fields[0].value, "1");
        assert_eq!(fields[1].value, "bob@example.com");
    }

    #[test]
    fn render_under_full_config_carries_everything_present() {
        let mut summary = PayloadSummary::default();
        absorb(&mut summary, "bob@example.com", &message(Some("hi")));
        absorb(
            &mut summary,
            "carol@example.com",
            &Stanza::Presence {
                presence_type: Some("subscribe".to_string()),
            },
        );

        let fields = render(&summary, NotifyConfig::all_enabled());
        assert_eq!(fields.len(), 5);
    }

    #[test]
    fn render_of_empty_summary_is_empty() {
        let fields = render(&PayloadSummary::default(), NotifyConfig::all_enabled());
        assert!(fields.is_empty());
    }

    #[test]
    fn decode_summary_roundtrips_rendered_fields() {
        let mut summary = PayloadSummary::default();
        absorb(&mut summary, "bob@example.com", &message(Some("hi")));

        let mut form = DataForm::new(forms::SUMMARY_FORM_TYPE);
        for field in render(&summary, NotifyConfig::all_enabled()) {
            form = form.set(&field.key, field.value);
        }

        assert_eq!(decode_summary(&[form]), SummaryDecode::Summary(summary));
    }

    #[test]
    fn decode_summary_distinguishes_absent_and_malformed() {
        assert_eq!(decode_summary(&[]), SummaryDecode::Absent);

        let bad =
            DataForm::new(forms::SUMMARY_FORM_TYPE).set(forms::KEY_MESSAGE_COUNT, "many");
        assert_eq!(decode_summary(&[bad]), SummaryDecode::Malformed);
    }
}
