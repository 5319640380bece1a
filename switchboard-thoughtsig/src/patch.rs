use crate::{KeyScope, SignatureStore};
use switchboard_schema::gemini::GenerateContentRequest;

/// What the patch pass did to a request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PatchStats {
    /// Thought parts that received a cached signature.
    pub thoughts_patched: usize,
    /// Thought parts dropped because no cached signature existed.
    pub thoughts_dropped: usize,
    /// functionCall parts stamped (cached signature or sentinel).
    pub calls_stamped: usize,
}

/// Re-attach thought signatures to a history being replayed upstream.
///
/// Model-role thought parts must echo the exact signature the upstream issued
/// for them; a thought we have no signature for cannot be replayed and is
/// dropped. functionCall parts accept the sentinel, so they are stamped with
/// the nearest preceding thought's signature when one resolved, else the
/// sentinel.
pub fn patch_request(
    store: &SignatureStore,
    scope: &KeyScope,
    request: &mut GenerateContentRequest,
) -> PatchStats {
    let mut stats = PatchStats::default();

    for content in &mut request.contents {
        if !content.is_model() {
            continue;
        }

        let mut last_resolved: Option<crate::ThoughtSignature> = None;

        content.parts.retain_mut(|part| {
            if part.is_thought() {
                if part.thought_signature.is_some() {
                    return true;
                }
                let cached = part
                    .text
                    .as_deref()
                    .and_then(|text| scope.cache_key(text))
                    .and_then(|key| store.get(key));

                return match cached {
                    Some(signature) => {
                        part.thought_signature = Some(signature.to_string());
                        last_resolved = Some(signature);
                        stats.thoughts_patched += 1;
                        true
                    }
                    None => {
                        stats.thoughts_dropped += 1;
                        false
                    }
                };
            }

            if part.function_call.is_some() && part.thought_signature.is_none() {
                let signature = last_resolved.clone().unwrap_or_else(|| store.sentinel());
                part.thought_signature = Some(signature.to_string());
                stats.calls_stamped += 1;
            }

            true
        });
    }

    request.contents.retain(|c| !c.parts.is_empty());
    stats
}
