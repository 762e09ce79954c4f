use super::*;
use crate::auth::mock_backend::{MockBackend, row, session, until};
use crate::auth::should_redirect_unauth;
use crate::backend::BackendError;
use crate::profile::Role;
use crate::validate::ValidationError;
use std::time::Duration;

fn ana_backend() -> MockBackend {
    let mut ana = row("u1", "Ana");
    ana.role = Role::Student;
    ana.country = Some("PE".into());
    ana.city = Some("Lima".into());
    MockBackend::new().with_session(session("u1")).with_row(ana)
}

fn start(mock: &Arc<MockBackend>) -> AuthFacade {
    AuthFacade::start(Arc::clone(mock) as Arc<dyn IdentityBackend>)
}

async fn settle(facade: &AuthFacade) -> AuthViewState {
    tokio::time::timeout(Duration::from_secs(2), facade.wait_until_loaded())
        .await
        .expect("facade never finished loading")
}

/// Settle, then wait for every startup fetch to be applied. Only for tests
/// that start from a settled facade; it cannot tell when loading cleared.
async fn quiesce(facade: &AuthFacade, mock: &MockBackend) -> AuthViewState {
    settle(facade).await;
    until(|| mock.fetch_calls() == mock.fetches_done()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    facade.view()
}

fn patch_city(city: &str) -> ProfilePatch {
    ProfilePatch { city: Some(city.into()), ..ProfilePatch::default() }
}

// =========================================================================
// Initialization
// =========================================================================

#[tokio::test]
async fn starts_loading() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    let view = facade.view();
    assert!(view.is_loading());
    assert!(!view.is_authenticated());
}

#[tokio::test]
async fn no_session_settles_signed_out() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    let view = settle(&facade).await;
    assert!(view.user().is_none());
    assert!(!view.is_authenticated());
    assert!(should_redirect_unauth(&view));
    assert_eq!(mock.fetch_calls(), 0);
}

#[tokio::test]
async fn restored_session_loads_profile() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    let view = quiesce(&facade, &mock).await;

    let user = view.user().expect("profile loaded");
    assert_eq!(user.name, "Ana");
    assert_eq!(user.role, Role::Student);
    assert_eq!(user.country, "PE");
    assert_eq!(user.city, "Lima");
    assert_eq!(user.email, "u1@example.com");
    assert!(view.is_authenticated());
    assert!(!view.is_loading());
    assert_eq!(facade.session().map(|s| s.user_id), Some("u1".into()));
}

#[tokio::test]
async fn missing_profile_row_leaves_user_signed_out() {
    let mock = Arc::new(MockBackend::new().with_session(session("u2")));
    let facade = start(&mock);
    let view = quiesce(&facade, &mock).await;
    assert!(view.user().is_none());
    assert!(!view.is_loading());
    assert!(mock.fetch_calls() >= 1);
}

#[tokio::test]
async fn restore_failure_settles_signed_out() {
    let mock = MockBackend::new();
    mock.fail_restore(true);
    let mock = Arc::new(mock);
    let facade = start(&mock);
    let view = settle(&facade).await;
    assert!(view.user().is_none());
}

#[tokio::test]
async fn failed_restore_waits_for_initial_session_profile() {
    let mock = ana_backend().gated();
    mock.fail_restore(true);
    let mock = Arc::new(mock);
    let facade = start(&mock);

    // INITIAL_SESSION for u1 is blocked in its fetch; the restore has failed.
    until(|| mock.fetch_calls() == 1 && mock.restores_done() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let view = facade.view();
    assert!(view.is_loading());
    assert!(!should_redirect_unauth(&view));

    mock.release_fetch();
    let view = settle(&facade).await;
    assert!(view.is_authenticated());
    assert_eq!(view.user().unwrap().name, "Ana");
}

#[tokio::test]
async fn empty_restore_waits_for_initial_session() {
    let mock = Arc::new(MockBackend::new().silent().with_row(row("u1", "Ana")));
    let facade = start(&mock);
    until(|| mock.restores_done() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(facade.view().is_loading());

    mock.fire(AuthEvent::InitialSession, Some(session("u1")));
    let view = settle(&facade).await;
    assert!(view.is_authenticated());
    assert_eq!(mock.fetch_calls(), 1);
}

#[tokio::test]
async fn fetch_failure_without_cache_settles_signed_out() {
    let mock = ana_backend();
    mock.fail_fetch(true);
    let mock = Arc::new(mock);
    let facade = start(&mock);
    let view = quiesce(&facade, &mock).await;
    assert!(view.user().is_none());
    assert!(!view.is_loading());
}

#[tokio::test]
async fn loading_clears_once_and_flags_stay_consistent() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    let mut rx = facade.watch();
    let first = rx.borrow_and_update().clone();

    let collector = tokio::spawn(async move {
        let mut seen = vec![first];
        let window = tokio::time::sleep(Duration::from_millis(300));
        tokio::pin!(window);
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    seen.push(rx.borrow_and_update().clone());
                }
                () = &mut window => break,
            }
        }
        seen
    });

    quiesce(&facade, &mock).await;
    mock.fire(AuthEvent::TokenRefreshed, Some(session("u1")));
    mock.fire(AuthEvent::SignedOut, None);
    mock.fire(AuthEvent::SignedIn, Some(session("u1")));

    let seen = collector.await.unwrap();
    assert!(seen[0].is_loading());
    let first_settled = seen.iter().position(|v| !v.is_loading()).expect("loading never cleared");
    assert!(seen[first_settled..].iter().all(|v| !v.is_loading()));
    assert!(seen.iter().all(|v| v.is_authenticated() == v.user().is_some()));
}

// =========================================================================
// Notifications
// =========================================================================

#[tokio::test]
async fn signed_in_loads_profile() {
    let mock = Arc::new(MockBackend::new().with_row(row("u1", "Ana")));
    let facade = start(&mock);
    assert!(settle(&facade).await.user().is_none());

    mock.fire(AuthEvent::SignedIn, Some(session("u1")));
    until(|| facade.view().is_authenticated()).await;
    assert_eq!(facade.view().user().unwrap().name, "Ana");
}

#[tokio::test]
async fn signed_out_clears_user() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    assert!(quiesce(&facade, &mock).await.is_authenticated());

    mock.fire(AuthEvent::SignedOut, None);
    until(|| !facade.view().is_authenticated()).await;
    let view = facade.view();
    assert!(view.user().is_none());
    assert!(!view.is_loading());
}

#[tokio::test]
async fn token_refresh_does_not_refetch() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;
    let fetches = mock.fetch_calls();

    mock.fire(AuthEvent::TokenRefreshed, Some(session("u1")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.fetch_calls(), fetches);
    assert!(facade.view().is_authenticated());
}

#[tokio::test]
async fn redundant_signed_in_refetches_profile() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;
    let fetches = mock.fetch_calls();

    mock.fire(AuthEvent::SignedIn, Some(session("u1")));
    until(|| mock.fetch_calls() == fetches + 1).await;
    quiesce(&facade, &mock).await;
    assert_eq!(facade.view().user().unwrap().name, "Ana");
}

#[tokio::test]
async fn failed_refresh_keeps_cached_profile() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;
    let fetches = mock.fetch_calls();

    mock.fail_fetch(true);
    mock.fire(AuthEvent::UserUpdated, Some(session("u1")));
    until(|| mock.fetches_done() == fetches + 1).await;
    let view = quiesce(&facade, &mock).await;
    assert_eq!(view.user().unwrap().name, "Ana");
}

#[tokio::test]
async fn switching_users_replaces_profile() {
    let mock = Arc::new(ana_backend().with_row(row("u3", "Lars")));
    let facade = start(&mock);
    quiesce(&facade, &mock).await;

    mock.fire(AuthEvent::SignedIn, Some(session("u3")));
    until(|| facade.view().user().is_some_and(|u| u.id == "u3")).await;
    assert_eq!(facade.view().user().unwrap().name, "Lars");
}

#[tokio::test]
async fn stale_profile_discarded_after_sign_out() {
    let mock = Arc::new(ana_backend().silent().gated());
    let facade = start(&mock);

    // Restore for u1 is now blocked inside the fetch.
    until(|| mock.fetch_calls() == 1).await;
    mock.fire(AuthEvent::SignedOut, None);
    until(|| !facade.view().is_loading()).await;
    assert!(facade.view().user().is_none());

    mock.release_fetch();
    until(|| mock.fetches_done() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let view = facade.view();
    assert!(view.user().is_none());
    assert!(!view.is_authenticated());
}

#[tokio::test]
async fn restore_finishing_after_logout_is_dropped() {
    let mock = Arc::new(ana_backend().silent().gated_restore());
    let facade = start(&mock);
    until(|| mock.restore_calls() == 1).await;

    facade.logout().await.unwrap();
    assert!(!facade.view().is_loading());
    assert!(facade.view().user().is_none());

    // The restore still answers with the session it read before sign-out.
    mock.release_restore();
    until(|| mock.restores_done() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let view = facade.view();
    assert!(view.user().is_none());
    assert!(!view.is_loading());
    assert!(facade.session().is_none());
}

#[tokio::test]
async fn restore_finishing_after_signed_out_is_dropped() {
    let mock = Arc::new(ana_backend().gated_restore());
    let facade = start(&mock);
    assert!(quiesce(&facade, &mock).await.is_authenticated());
    let fetches = mock.fetch_calls();

    mock.fire(AuthEvent::SignedOut, None);
    until(|| !facade.view().is_authenticated()).await;
    mock.release_restore();
    until(|| mock.restores_done() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let view = facade.view();
    assert!(view.user().is_none());
    assert!(!view.is_loading());
    assert!(facade.session().is_none());
    assert_eq!(mock.fetch_calls(), fetches);
}

#[tokio::test]
async fn dropping_facade_unsubscribes() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    settle(&facade).await;
    assert_eq!(mock.live_listeners(), 1);

    drop(facade);
    until(|| mock.live_listeners() == 0).await;
}

// =========================================================================
// Operations
// =========================================================================

#[tokio::test]
async fn login_normalizes_email() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    facade.login("  Ana@Example.com ").await.unwrap();
    assert_eq!(mock.link_requests(), vec!["ana@example.com".to_owned()]);
    assert!(facade.view().user().is_none());
}

#[tokio::test]
async fn login_rejects_invalid_email() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    let err = facade.login("not-an-email").await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ValidationError::InvalidEmail)));
    assert!(mock.link_requests().is_empty());
}

#[tokio::test]
async fn logout_clears_state_without_waiting_for_event() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;

    facade.logout().await.unwrap();
    let view = facade.view();
    assert!(view.user().is_none());
    assert!(!view.is_loading());
    assert_eq!(mock.sign_out_calls(), 1);
}

#[tokio::test]
async fn logout_failure_keeps_user() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;

    mock.fail_sign_out(true);
    let err = facade.logout().await.unwrap_err();
    assert!(matches!(err, AuthError::Backend(BackendError::Response { status: 500, .. })));
    assert!(facade.view().is_authenticated());
}

#[tokio::test]
async fn update_profile_merges_on_success() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;
    let fetches = mock.fetch_calls();

    let updated = facade.update_profile(patch_city("Cusco")).await.unwrap();
    assert_eq!(updated.city, "Cusco");
    assert_eq!(updated.name, "Ana");
    assert_eq!(facade.view().user().unwrap().city, "Cusco");

    let updates = mock.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "u1");
    assert_eq!(updates[0].1.patch, patch_city("Cusco"));
    assert_eq!(mock.fetch_calls(), fetches);
}

#[tokio::test]
async fn update_profile_failure_leaves_cache_untouched() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;

    mock.fail_update(true);
    let err = facade.update_profile(patch_city("Cusco")).await.unwrap_err();
    assert!(matches!(err, AuthError::Backend(_)));
    assert_eq!(facade.view().user().unwrap().city, "Lima");
}

#[tokio::test]
async fn update_profile_without_user_makes_no_backend_call() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    settle(&facade).await;

    let err = facade.update_profile(patch_city("Cusco")).await.unwrap_err();
    assert!(matches!(err, AuthError::NoCurrentUser));
    assert_eq!(mock.update_calls(), 0);
}

#[tokio::test]
async fn update_profile_rejects_blank_name() {
    let mock = Arc::new(ana_backend());
    let facade = start(&mock);
    quiesce(&facade, &mock).await;

    let patch = ProfilePatch { name: Some("   ".into()), ..ProfilePatch::default() };
    let err = facade.update_profile(patch).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ValidationError::BlankField("name"))));
    assert_eq!(mock.update_calls(), 0);
}

#[tokio::test]
async fn refetch_policy_reads_row_back() {
    let mock = Arc::new(ana_backend());
    let options = AuthOptions { update_policy: UpdatePolicy::RefetchAfterWrite };
    let facade = AuthFacade::start_with(Arc::clone(&mock) as Arc<dyn IdentityBackend>, options);
    quiesce(&facade, &mock).await;
    let fetches = mock.fetch_calls();

    let updated = facade.update_profile(patch_city("Cusco")).await.unwrap();
    assert_eq!(mock.fetch_calls(), fetches + 1);
    assert_eq!(updated.city, "Cusco");
    assert_eq!(mock.stored_row("u1").unwrap().city.as_deref(), Some("Cusco"));
}

#[tokio::test]
async fn refetch_policy_merges_locally_when_row_vanishes() {
    let mock = Arc::new(ana_backend());
    let options = AuthOptions { update_policy: UpdatePolicy::RefetchAfterWrite };
    let facade = AuthFacade::start_with(Arc::clone(&mock) as Arc<dyn IdentityBackend>, options);
    quiesce(&facade, &mock).await;

    mock.remove_row("u1");
    let updated = facade.update_profile(patch_city("Cusco")).await.unwrap();
    assert_eq!(updated.city, "Cusco");
    assert_eq!(updated.name, "Ana");
    let view = facade.view();
    assert!(view.is_authenticated());
    assert_eq!(view.user().unwrap().city, "Cusco");
}

#[tokio::test]
async fn password_reset_is_forwarded() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    facade
        .request_password_reset("Mei@Example.com", "https://pals.example.com/reset")
        .await
        .unwrap();
    assert_eq!(
        mock.password_resets(),
        vec![("mei@example.com".to_owned(), "https://pals.example.com/reset".to_owned())]
    );
}

#[tokio::test]
async fn short_password_is_rejected_locally() {
    let mock = Arc::new(MockBackend::new());
    let facade = start(&mock);
    let err = facade.set_new_password("abc").await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ValidationError::PasswordTooShort { min: 6 })));
    assert!(mock.passwords().is_empty());

    facade.set_new_password("hunter22").await.unwrap();
    assert_eq!(mock.passwords(), vec!["hunter22".to_owned()]);
}
