//! Ledger service - point creation and cred-backed endorsement
//!
//! Coordinates identity resolution, the point store and the balance ledger.
//! Each write is one unit of work: the point, the conditional debit and the
//! endorsement commit together or not at all. Events and enrichment are
//! dispatched only after commit and cannot fail the call.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::{balances, endorsements, points, Endorsement, LedgerDb, Point, PointId, PointView};
use crate::error::LedgerError;
use crate::identity::{CallerContext, Identity, IdentityResolver};

use super::enrichment::{EnrichmentJob, EnrichmentQueue};
use super::events::{EventBus, LedgerEvent};

/// Ledger service for business logic
pub struct LedgerService {
    db: Arc<LedgerDb>,
    resolver: Arc<dyn IdentityResolver>,
    events: Arc<EventBus>,
    enrichment: Option<EnrichmentQueue>,
}

impl LedgerService {
    /// Create a new ledger service without enrichment
    pub fn new(
        db: Arc<LedgerDb>,
        resolver: Arc<dyn IdentityResolver>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            resolver,
            events,
            enrichment: None,
        }
    }

    /// Hand committed points to an enrichment worker
    pub fn with_enrichment(mut self, queue: EnrichmentQueue) -> Self {
        self.enrichment = Some(queue);
        self
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a point, optionally endorsing it with `cred` from the creator.
    ///
    /// Fails with `Unauthenticated` before touching the store when the caller
    /// does not resolve, and with `InsufficientCred` (nothing persisted) when
    /// the creator's balance does not cover `cred`.
    pub fn make_point(
        &self,
        caller: &CallerContext,
        content: &str,
        cred: i64,
    ) -> Result<PointId, LedgerError> {
        let creator = self.require_identity(caller)?;
        points::validate_content(content)?;
        validate_cred(cred, false)?;

        let (point_id, endorsement) = self.db.unit_of_work(|conn| {
            let point_id = points::create_point(conn, content, creator.as_str())?;

            let endorsement = if cred > 0 {
                Some(debit_and_endorse(conn, point_id, &creator, cred)?)
            } else {
                None
            };

            Ok((point_id, endorsement))
        })?;

        debug!(point_id, creator = %creator, cred, "Point committed");

        self.events.emit(LedgerEvent::PointCreated {
            id: point_id,
            created_by: creator.to_string(),
        });
        if let Some(endorsement) = endorsement {
            self.emit_endorsement(&endorsement);
        }

        self.dispatch_enrichment(point_id, content);

        Ok(point_id)
    }

    /// Commit `cred` from the caller to an existing point
    pub fn endorse(
        &self,
        caller: &CallerContext,
        point_id: PointId,
        cred: i64,
    ) -> Result<Endorsement, LedgerError> {
        let user = self.require_identity(caller)?;
        validate_cred(cred, true)?;

        let endorsement = self.db.unit_of_work(|conn| {
            if points::get_point(conn, point_id)?.is_none() {
                return Err(LedgerError::NotFound(format!("point {}", point_id)));
            }
            debit_and_endorse(conn, point_id, &user, cred)
        })?;

        debug!(point_id, user = %user, cred, "Endorsement committed");
        self.emit_endorsement(&endorsement);

        Ok(endorsement)
    }

    /// Credit an identity's balance (external crediting processes)
    pub fn grant_cred(&self, identity: &Identity, amount: i64) -> Result<i64, LedgerError> {
        let balance = self
            .db
            .unit_of_work(|conn| balances::grant_cred(conn, identity.as_str(), amount))?;

        self.events.emit(LedgerEvent::CredGranted {
            user_id: identity.to_string(),
            amount,
            balance,
        });

        Ok(balance)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Point with endorsement aggregates; `viewer_cred` is set for resolved callers
    pub fn fetch_point(
        &self,
        caller: &CallerContext,
        point_id: PointId,
    ) -> Result<Option<PointView>, LedgerError> {
        let viewer = self.resolver.resolve(caller);

        self.db.with_conn(|conn| {
            let Some(point) = points::get_point(conn, point_id)? else {
                return Ok(None);
            };

            let totals = endorsements::point_totals(conn, point_id)?;
            let viewer_cred = match viewer {
                Some(ref viewer) => Some(endorsements::cred_by_user_on_point(
                    conn,
                    point_id,
                    viewer.as_str(),
                )?),
                None => None,
            };

            Ok(Some(PointView {
                point,
                total_cred: totals.total_cred,
                supporters: totals.supporters,
                viewer_cred,
            }))
        })
    }

    /// Newest points authored by `creator`
    pub fn list_points(&self, creator: &Identity, limit: i64) -> Result<Vec<Point>, LedgerError> {
        if limit <= 0 {
            return Err(LedgerError::Validation("limit must be positive".into()));
        }
        self.db
            .with_conn(|conn| points::list_points_by_creator(conn, creator.as_str(), limit))
    }

    /// Endorsement history of a point, oldest first
    pub fn point_endorsements(&self, point_id: PointId) -> Result<Vec<Endorsement>, LedgerError> {
        self.db.with_conn(|conn| {
            if points::get_point(conn, point_id)?.is_none() {
                return Err(LedgerError::NotFound(format!("point {}", point_id)));
            }
            endorsements::endorsements_for_point(conn, point_id)
        })
    }

    /// Spendable cred of the caller
    pub fn balance(&self, caller: &CallerContext) -> Result<i64, LedgerError> {
        let user = self.require_identity(caller)?;
        self.db
            .with_conn(|conn| balances::get_balance(conn, user.as_str()))
    }

    /// Spendable cred of any identity
    pub fn balance_of(&self, identity: &Identity) -> Result<i64, LedgerError> {
        self.db
            .with_conn(|conn| balances::get_balance(conn, identity.as_str()))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_identity(&self, caller: &CallerContext) -> Result<Identity, LedgerError> {
        self.resolver.resolve(caller).ok_or_else(|| {
            debug!("Rejecting unauthenticated ledger call");
            LedgerError::Unauthenticated
        })
    }

    fn emit_endorsement(&self, endorsement: &Endorsement) {
        self.events.emit(LedgerEvent::EndorsementRecorded {
            id: endorsement.id,
            point_id: endorsement.point_id,
            user_id: endorsement.user_id.clone(),
            cred: endorsement.cred,
        });
    }

    fn dispatch_enrichment(&self, point_id: PointId, content: &str) {
        let Some(ref queue) = self.enrichment else {
            return;
        };

        let accepted = queue.dispatch(EnrichmentJob {
            point_id,
            content: content.to_string(),
        });
        if !accepted {
            warn!(point_id, "Point committed without enrichment");
        }
    }
}

/// Conditional debit followed by the endorsement row, on the caller's transaction
fn debit_and_endorse(
    conn: &mut diesel::SqliteConnection,
    point_id: PointId,
    user: &Identity,
    cred: i64,
) -> Result<Endorsement, LedgerError> {
    if !balances::debit_cred(conn, user.as_str(), cred)? {
        return Err(LedgerError::InsufficientCred {
            user_id: user.to_string(),
            requested: cred,
        });
    }
    endorsements::record_endorsement(conn, point_id, user.as_str(), cred)
}

fn validate_cred(cred: i64, require_positive: bool) -> Result<(), LedgerError> {
    if cred < 0 {
        return Err(LedgerError::Validation(format!(
            "cred must not be negative, got {}",
            cred
        )));
    }
    if require_positive && cred == 0 {
        return Err(LedgerError::Validation("cred must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Maps raw tokens straight to identities
    struct StaticResolver(HashMap<String, Identity>);

    impl IdentityResolver for StaticResolver {
        fn resolve(&self, caller: &CallerContext) -> Option<Identity> {
            caller.session_token().and_then(|t| self.0.get(t).cloned())
        }
    }

    fn service() -> (LedgerService, Arc<LedgerDb>) {
        let db = Arc::new(LedgerDb::open_in_memory().unwrap());
        let resolver = StaticResolver(HashMap::from([
            ("alice-token".to_string(), Identity::new("alice")),
            ("bob-token".to_string(), Identity::new("bob")),
        ]));
        let service = LedgerService::new(db.clone(), Arc::new(resolver), Arc::new(EventBus::new()));
        (service, db)
    }

    fn alice() -> CallerContext {
        CallerContext::with_token("alice-token")
    }

    #[test]
    fn test_make_point_without_cred() {
        let (service, db) = service();
        service.grant_cred(&Identity::new("alice"), 100).unwrap();

        let id = service
            .make_point(&alice(), "Climate policy should prioritize nuclear", 0)
            .unwrap();

        let view = service.fetch_point(&alice(), id).unwrap().unwrap();
        assert_eq!(view.point.created_by, "alice");
        assert_eq!(view.total_cred, 0);
        assert_eq!(view.viewer_cred, Some(0));
        assert_eq!(service.balance(&alice()).unwrap(), 100);
        assert_eq!(db.stats().unwrap().endorsement_count, 0);
    }

    #[test]
    fn test_make_point_with_cred_debits_and_endorses() {
        let (service, _db) = service();
        service.grant_cred(&Identity::new("alice"), 50).unwrap();

        let id = service.make_point(&alice(), "X", 50).unwrap();

        let view = service.fetch_point(&alice(), id).unwrap().unwrap();
        assert_eq!(view.total_cred, 50);
        assert_eq!(view.supporters, 1);
        assert_eq!(service.balance(&alice()).unwrap(), 0);

        let err = service.make_point(&alice(), "Y", 1).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCred { requested: 1, .. }));
    }

    #[test]
    fn test_unauthenticated_creates_nothing() {
        let (service, db) = service();

        let err = service
            .make_point(&CallerContext::anonymous(), "content", 0)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthenticated));

        let err = service
            .make_point(&CallerContext::with_token("forged"), "content", 5)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthenticated));

        assert_eq!(db.stats().unwrap().point_count, 0);
    }

    #[test]
    fn test_negative_cred_rejected() {
        let (service, db) = service();
        service.grant_cred(&Identity::new("alice"), 10).unwrap();

        let err = service.make_point(&alice(), "content", -1).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(db.stats().unwrap().point_count, 0);
        assert_eq!(service.balance(&alice()).unwrap(), 10);
    }

    #[test]
    fn test_endorse_existing_point() {
        let (service, _db) = service();
        service.grant_cred(&Identity::new("alice"), 10).unwrap();
        service.grant_cred(&Identity::new("bob"), 10).unwrap();

        let id = service.make_point(&alice(), "Point", 3).unwrap();
        let bob = CallerContext::with_token("bob-token");
        service.endorse(&bob, id, 4).unwrap();
        service.endorse(&bob, id, 2).unwrap();

        let view = service.fetch_point(&bob, id).unwrap().unwrap();
        assert_eq!(view.total_cred, 9);
        assert_eq!(view.supporters, 2);
        assert_eq!(view.viewer_cred, Some(6));
        assert_eq!(service.balance(&bob).unwrap(), 4);

        let anonymous = service
            .fetch_point(&CallerContext::anonymous(), id)
            .unwrap()
            .unwrap();
        assert_eq!(anonymous.viewer_cred, None);
    }

    #[test]
    fn test_endorse_missing_point_keeps_balance() {
        let (service, _db) = service();
        service.grant_cred(&Identity::new("alice"), 10).unwrap();

        let err = service.endorse(&alice(), 404, 5).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(service.balance(&alice()).unwrap(), 10);
    }

    #[test]
    fn test_fetch_point_with_overflowing_total_is_error() {
        let (service, _db) = service();
        service.grant_cred(&Identity::new("alice"), i64::MAX).unwrap();
        service.grant_cred(&Identity::new("bob"), i64::MAX).unwrap();

        let id = service.make_point(&alice(), "p", i64::MAX).unwrap();
        service
            .endorse(&CallerContext::with_token("bob-token"), id, i64::MAX)
            .unwrap();

        assert!(matches!(
            service.fetch_point(&alice(), id),
            Err(LedgerError::Internal(_))
        ));
    }

    #[test]
    fn test_endorse_zero_cred_rejected() {
        let (service, _db) = service();
        service.grant_cred(&Identity::new("alice"), 10).unwrap();
        let id = service.make_point(&alice(), "Point", 0).unwrap();

        let err = service.endorse(&alice(), id, 0).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_list_points_and_endorsement_history() {
        let (service, _db) = service();
        service.grant_cred(&Identity::new("alice"), 10).unwrap();
        service.grant_cred(&Identity::new("bob"), 10).unwrap();

        let first = service.make_point(&alice(), "First", 2).unwrap();
        let second = service.make_point(&alice(), "Second", 0).unwrap();
        service
            .endorse(&CallerContext::with_token("bob-token"), first, 5)
            .unwrap();

        let listed: Vec<_> = service
            .list_points(&Identity::new("alice"), 10)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(listed, vec![second, first]);
        assert!(service.list_points(&Identity::new("alice"), 0).is_err());

        let history = service.point_endorsements(first).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user_id, "alice");
        assert_eq!(history[1].user_id, "bob");
        assert!(service.point_endorsements(second).unwrap().is_empty());
        assert!(matches!(
            service.point_endorsements(999),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_events_emitted_after_commit() {
        let (service, _db) = service();
        let mut receiver = service.events.subscribe();

        service.grant_cred(&Identity::new("alice"), 10).unwrap();
        let id = service.make_point(&alice(), "Point", 4).unwrap();
        let _ = service.make_point(&alice(), "Too expensive", 100);

        assert!(matches!(
            receiver.recv().await.unwrap(),
            LedgerEvent::CredGranted { balance: 10, .. }
        ));
        assert_eq!(
            receiver.recv().await.unwrap(),
            LedgerEvent::PointCreated {
                id,
                created_by: "alice".into(),
            }
        );
        assert!(matches!(
            receiver.recv().await.unwrap(),
            LedgerEvent::EndorsementRecorded { cred: 4, .. }
        ));
        // The failed call emitted nothing
        assert!(receiver.try_recv().is_err());
    }
}
