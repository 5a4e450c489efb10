//! Purpose: Resolve a selector against the local connection set and write to every match.
//! Exports: `Resolution`, `resolve`.
//! Role: Shared by the ingestion endpoint and the forwarding engine.
//! Invariants: Each matched connection is written exactly once per call.
//! Invariants: The residual never contains an id that was delivered locally.
//! Invariants: Group lookup happens before any write; a lookup error writes nothing.
use std::collections::BTreeSet;

use serde_json::Value;

use super::error::{Error, ErrorKind};
use super::registry::ConnectionRegistry;
use super::rooms::GroupLookup;
use super::selector::Selector;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resolution {
    pub delivered: u64,
    /// Targets still to be reached elsewhere; `None` when nothing is left.
    pub residual: Option<Selector>,
}

pub async fn resolve(
    selector: &Selector,
    msg: &Value,
    registry: &dyn ConnectionRegistry,
    groups: Option<&dyn GroupLookup>,
) -> Result<Resolution, Error> {
    let resolution = match selector {
        Selector::All => {
            let mut delivered = 0;
            registry.for_each_connection(&mut |connection| {
                connection.write(msg);
                delivered += 1;
            });
            Resolution {
                delivered,
                residual: None,
            }
        }
        Selector::One(id) => match registry.get_connection(id) {
            Some(connection) => {
                connection.write(msg);
                Resolution {
                    delivered: 1,
                    residual: None,
                }
            }
            None => Resolution {
                delivered: 0,
                residual: Some(Selector::One(id.clone())),
            },
        },
        Selector::Many(ids) => {
            let mut seen = BTreeSet::new();
            let mut delivered = 0;
            let mut missing = Vec::new();
            for id in ids {
                if !seen.insert(id.as_str()) {
                    continue;
                }
                match registry.get_connection(id) {
                    Some(connection) => {
                        connection.write(msg);
                        delivered += 1;
                    }
                    None => missing.push(id.clone()),
                }
            }
            Resolution {
                delivered,
                residual: (!missing.is_empty()).then_some(Selector::Many(missing)),
            }
        }
        Selector::Group { names, except } => {
            let Some(groups) = groups else {
                return Err(Error::new(ErrorKind::GroupLookupFailed)
                    .with_message("no group lookup configured"));
            };
            let membership = groups.members_of(names).await?;
            let mut targets: BTreeSet<&String> = membership.values().flatten().collect();
            targets.retain(|id| !except.contains(*id));

            let mut delivered = 0;
            let mut reached = except.clone();
            for id in targets {
                if let Some(connection) = registry.get_connection(id) {
                    connection.write(msg);
                    delivered += 1;
                    reached.insert(id.clone());
                }
            }
            Resolution {
                delivered,
                residual: Some(Selector::Group {
                    names: names.clone(),
                    except: reached,
                }),
            }
        }
    };

    tracing::debug!(
        selector = selector.type_name(),
        delivered = resolution.delivered,
        residual = resolution.residual.is_some(),
        "resolved locally"
    );
    Ok(resolution)
}
