use chatgate_provider_core::{ByteStream, ChatInput, Provider, ProviderError, SessionPolicy};
use tracing::{debug, warn};

/// Opens the upstream stream for one request.
///
/// A session failure evicts the conversation and retries once on a fresh
/// one; a second session failure invalidates the stored credential.
pub(crate) async fn open_stream(
    provider: &dyn Provider,
    session_key: &str,
    input: &ChatInput,
) -> Result<ByteStream, ProviderError> {
    let mut session = None;
    let err = match try_chat(provider, session_key, input, &mut session).await {
        Ok(stream) => return Ok(stream),
        Err(err) if provider.is_session_failure(&err) => err,
        Err(err) => return Err(err),
    };

    warn!(
        provider = %provider.id(),
        session_key = %session_key,
        error = %err,
        "session rejected, retrying on a fresh session"
    );
    if let Some(stale) = session.take() {
        provider.sessions().evict(session_key, &stale);
    }

    match try_chat(provider, session_key, input, &mut session).await {
        Err(err) if provider.is_session_failure(&err) => {
            warn!(
                provider = %provider.id(),
                error = %err,
                "retry rejected, invalidating credentials"
            );
            if let Err(clear_err) = provider.clear_credentials().await {
                warn!(provider = %provider.id(), error = %clear_err, "failed to clear credentials");
            }
            Err(err)
        }
        other => other,
    }
}

async fn try_chat(
    provider: &dyn Provider,
    session_key: &str,
    input: &ChatInput,
    session: &mut Option<String>,
) -> Result<ByteStream, ProviderError> {
    let session_id = acquire_session(provider, session_key).await?;
    *session = Some(session_id.clone());
    provider.chat(&session_id, input).await
}

async fn acquire_session(provider: &dyn Provider, session_key: &str) -> Result<String, ProviderError> {
    if provider.session_policy() == SessionPolicy::PerRequest {
        return provider.create_session().await;
    }
    if let Some(session_id) = provider.sessions().get(session_key) {
        return Ok(session_id);
    }
    let session_id = provider.create_session().await?;
    debug!(
        provider = %provider.id(),
        session_key = %session_key,
        session_id = %session_id,
        "session created"
    );
    provider.sessions().insert(session_key, session_id.clone());
    Ok(session_id)
}
