//! Subscription management.
//!
//! Enable/disable of push per user resource, plus the content-inclusion
//! configuration negotiation. Subscriptions are deduplicated by resource
//! and by node: enabling again for either replaces the prior entry.

use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{PushError, Result};
use crate::forms::{
    self, convert_flag, parse_form, DataForm, FieldSpec, ParseResult,
    CONFIG_FORM_TYPE, PUBLISH_OPTIONS_FORM_TYPE,
};
use crate::models::{
    address_resource, bare_address, ConfigPatch, NotifyConfig, Subscription, SubscriptionKind,
};

/// Privilege level applied when merging a requested configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPrivilege {
    /// A toggle may move true -> false but never false -> true. Used for
    /// self-service enables.
    DisableOnly,
    /// Unrestricted. Reserved for administrative contexts.
    EnableDisable,
}

/// Merge a requested configuration patch into a base configuration. Returns
/// the effective configuration and the list of options the server adjusted
/// away from the requested value.
pub fn make_config(
    patch: ConfigPatch,
    base: NotifyConfig,
    privilege: ConfigPrivilege,
) -> (NotifyConfig, Vec<(&'static str, bool)>) {
    let mut adjusted = Vec::new();

    let mut apply = |key: &'static str, requested: Option<bool>, base: bool| match requested {
        None => base,
        Some(req) => {
            let effective = match privilege {
                ConfigPrivilege::EnableDisable => req,
                ConfigPrivilege::DisableOnly => base && req,
            };
            if effective != req {
                adjusted.push((key, effective));
            }
            effective
        }
    };

    let effective = NotifyConfig {
        include_senders: apply(
            forms::KEY_INCLUDE_SENDERS,
            patch.include_senders,
            base.include_senders,
        ),
        include_message_count: apply(
            forms::KEY_INCLUDE_MESSAGE_COUNT,
            patch.include_message_count,
            base.include_message_count,
        ),
        include_subscription_count: apply(
            forms::KEY_INCLUDE_SUBSCRIPTION_COUNT,
            patch.include_subscription_count,
            base.include_subscription_count,
        ),
        include_message_bodies: apply(
            forms::KEY_INCLUDE_MESSAGE_BODIES,
            patch.include_message_bodies,
            base.include_message_bodies,
        ),
    };

    (effective, adjusted)
}

impl Engine {
    /// Enable push for the requesting resource towards a push service.
    /// Returns a form listing the options the server adjusted, or `None`
    /// when the request was applied as-is.
    pub async fn enable(
        &self,
        owner: &str,
        service: &str,
        node: Option<&str>,
        submitted: &[DataForm],
    ) -> Result<Option<DataForm>> {
        let node = match node {
            Some(n) if !n.is_empty() => n,
            _ => return Err(PushError::NotAcceptable("node required")),
        };
        let resource = address_resource(owner)
            .ok_or(PushError::NotAcceptable("resource required"))?
            .to_string();
        let bare = bare_address(owner);

        let service_host = bare_address(service);
        let kind = if self.registry.is_local_pubsub_host(&service_host) {
            // The secret, if any, belongs to remote services; locally the
            // registration already carries it.
            SubscriptionKind::Local {
                pubsub_host: service_host,
            }
        } else {
            SubscriptionKind::Remote {
                peer: service.to_lowercase(),
                secret: parse_secret(submitted)?,
            }
        };

        let patch = parse_config_patch(submitted)?;

        let adjusted = self.store.with_user_upsert(
            &bare,
            self.defaults,
            |user, created| {
                let base = if created { self.defaults } else { user.config };
                let (effective, adjusted) =
                    make_config(patch, base, ConfigPrivilege::DisableOnly);
                user.config = effective;

                // Replace rather than append: one subscription per resource
                // and per node.
                user.subscriptions
                    .retain(|s| s.resource != resource && s.node != node);
                user.subscriptions.push(Subscription {
                    resource: resource.clone(),
                    node: node.to_string(),
                    kind,
                });

                adjusted
            },
        );

        info!(node = %node, "Enabled push subscription");

        if adjusted.is_empty() {
            Ok(None)
        } else {
            let mut form = DataForm::new(CONFIG_FORM_TYPE);
            for (key, value) in adjusted {
                form = form.set(key, value.to_string());
            }
            Ok(Some(form))
        }
    }

    /// Disable push subscriptions matching the service (and node, when
    /// given). Removal is atomic; the user's record, configuration and
    /// pending summary survive.
    pub async fn disable(&self, owner: &str, service: &str, node: Option<&str>) -> Result<()> {
        if node == Some("") {
            return Err(PushError::NotAcceptable("node must not be empty"));
        }
        let bare = bare_address(owner);
        let peer_full = service.to_lowercase();
        let peer_host = bare_address(service);

        let removed = self
            .store
            .with_user_mut(&bare, |user| {
                let before = user.subscriptions.len();
                user.subscriptions.retain(|s| {
                    let node_match = node.map_or(true, |n| s.node == n);
                    let peer_match = match &s.kind {
                        SubscriptionKind::Local { pubsub_host } => *pubsub_host == peer_host,
                        SubscriptionKind::Remote { peer, .. } => *peer == peer_full,
                    };
                    !(node_match && peer_match)
                });
                before - user.subscriptions.len()
            })
            .ok_or(PushError::ItemNotFound)?;

        if removed == 0 {
            return Err(PushError::ItemNotFound);
        }

        debug!(removed, "Disabled push subscriptions");
        Ok(())
    }
}

/// Extract the optional shared secret from publish-option forms. A missing
/// form or field is fine; a malformed form is not.
fn parse_secret(submitted: &[DataForm]) -> Result<Option<String>> {
    match parse_form(
        submitted,
        PUBLISH_OPTIONS_FORM_TYPE,
        &[],
        &[FieldSpec::single(forms::KEY_SECRET)],
    ) {
        ParseResult::NotFound => Ok(None),
        ParseResult::Error => Err(PushError::BadRequest("malformed publish options")),
        ParseResult::Values(values) => Ok(values
            .get(forms::KEY_SECRET)
            .and_then(|v| v.as_text())
            .map(str::to_string)),
    }
}

fn parse_config_patch(submitted: &[DataForm]) -> Result<ConfigPatch> {
    let optional = [
        FieldSpec::converted(forms::KEY_INCLUDE_SENDERS, convert_flag),
        FieldSpec::converted(forms::KEY_INCLUDE_MESSAGE_COUNT, convert_flag),
        FieldSpec::converted(forms::KEY_INCLUDE_SUBSCRIPTION_COUNT, convert_flag),
        FieldSpec::converted(forms::KEY_INCLUDE_MESSAGE_BODIES, convert_flag),
    ];

    match parse_form(submitted, CONFIG_FORM_TYPE, &[], &optional) {
        ParseResult::NotFound => Ok(ConfigPatch::default()),
        ParseResult::Error => Err(PushError::BadRequest("malformed configuration form")),
        ParseResult::Values(values) => {
            let flag = |key: &str| values.get(key).and_then(|v| v.as_flag());
            Ok(ConfigPatch {
                include_senders: flag(forms::KEY_INCLUDE_SENDERS),
                include_message_count: flag(forms::KEY_INCLUDE_MESSAGE_COUNT),
                include_subscription_count: flag(forms::KEY_INCLUDE_SUBSCRIPTION_COUNT),
                include_message_bodies: flag(forms::KEY_INCLUDE_MESSAGE_BODIES),
            })
        }
    }
}
