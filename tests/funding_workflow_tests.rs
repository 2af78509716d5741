//! End-to-end tests of the funding workflow against the in-memory ledger

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use microlend_server::funding::{FundingEngine, FundingError, RetryPolicy};
use microlend_server::ledger::MemoryLedger;
use microlend_server::offer::{CreateLoanOffer, LoanOffer, OfferStatus};
use microlend_server::request::{CreateLoanRequest, LoanRequest, RequestFilter, RequestStatus};

const STORY: &str =
    "Expanding my bakery with a second oven so I can take on wholesale café orders.";

fn engine() -> (Arc<FundingEngine>, MemoryLedger) {
    let ledger = MemoryLedger::new();
    let engine = FundingEngine::new(Arc::new(ledger.clone()), RetryPolicy::immediate(3));
    (Arc::new(engine), ledger)
}

fn request_payload(amount: Decimal, max_apr: Decimal, term: i32) -> CreateLoanRequest {
    CreateLoanRequest {
        amount,
        max_apr,
        term,
        title: "Second oven".to_string(),
        story: STORY.to_string(),
        tags: vec!["business".to_string(), " food ".to_string(), "".to_string()],
    }
}

fn offer_payload(amount: Decimal, apr: Decimal) -> CreateLoanOffer {
    CreateLoanOffer {
        amount,
        apr,
        message: None,
    }
}

async fn seeded_request(engine: &FundingEngine, borrower: Uuid) -> LoanRequest {
    engine
        .submit_request(borrower, request_payload(dec!(1000), dec!(10), 12))
        .await
        .unwrap()
}

async fn offer(engine: &FundingEngine, request_id: Uuid, apr: Decimal) -> LoanOffer {
    engine
        .submit_offer(request_id, Uuid::new_v4(), offer_payload(dec!(1000), apr))
        .await
        .unwrap()
}

async fn offer_status(engine: &FundingEngine, offer_id: Uuid) -> OfferStatus {
    engine.get_offer(offer_id).await.unwrap().status
}

#[tokio::test]
async fn test_submit_request_starts_seeking_funds() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();

    let request = seeded_request(&engine, borrower).await;

    assert_eq!(request.status, RequestStatus::SeekingFunds);
    assert_eq!(request.amount_funded, Decimal::ZERO);
    assert_eq!(request.accepted_offer_id, None);
    assert_eq!(request.final_apr, None);
    assert_eq!(request.tags, vec!["business", "food"]);
    assert!(request.is_consistent());

    let stored = engine.requests().get_by_id(request.id).await.unwrap();
    assert_eq!(stored, request);
}

#[tokio::test]
async fn test_submit_request_rejects_bad_terms() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();

    for payload in [
        request_payload(dec!(0), dec!(10), 12),
        request_payload(dec!(1000), dec!(0), 12),
        request_payload(dec!(1000), dec!(100.0001), 12),
        request_payload(dec!(1000), dec!(10), 0),
    ] {
        let result = engine.submit_request(borrower, payload).await;
        assert!(matches!(result, Err(FundingError::Validation(_))));
    }

    let mut short_story = request_payload(dec!(1000), dec!(10), 12);
    short_story.story = "Too short".to_string();
    assert!(matches!(
        engine.submit_request(borrower, short_story).await,
        Err(FundingError::Validation(_))
    ));
}

#[tokio::test]
async fn test_offer_boundaries() {
    let (engine, _) = engine();
    let request = seeded_request(&engine, Uuid::new_v4()).await;
    let lender = Uuid::new_v4();

    for (amount, apr) in [
        (dec!(0), dec!(5)),
        (dec!(500), dec!(0)),
        (dec!(500), dec!(100.0001)),
    ] {
        let result = engine
            .submit_offer(request.id, lender, offer_payload(amount, apr))
            .await;
        assert!(
            matches!(result, Err(FundingError::Validation(_))),
            "amount {} apr {} should be rejected",
            amount,
            apr
        );
    }

    let at_ceiling = engine
        .submit_offer(request.id, lender, offer_payload(dec!(500), dec!(100)))
        .await
        .unwrap();
    assert_eq!(at_ceiling.status, OfferStatus::Pending);

    // Offering more than was asked for would overfund the request
    let over = engine
        .submit_offer(request.id, lender, offer_payload(dec!(1000.01), dec!(5)))
        .await;
    assert!(matches!(over, Err(FundingError::Validation(_))));
}

#[tokio::test]
async fn test_offer_on_unknown_request_is_not_found() {
    let (engine, _) = engine();

    let result = engine
        .submit_offer(Uuid::new_v4(), Uuid::new_v4(), offer_payload(dec!(10), dec!(5)))
        .await;

    assert!(matches!(result, Err(FundingError::NotFound(_))));
}

#[tokio::test]
async fn test_accept_funds_request_and_sweeps_competitors() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;

    let o1 = offer(&engine, request.id, dec!(8)).await;
    let o2 = offer(&engine, request.id, dec!(6)).await;
    assert_eq!(o1.status, OfferStatus::Pending);
    assert_eq!(o2.status, OfferStatus::Pending);

    let funded = engine
        .accept_offer(request.id, o2.id, borrower)
        .await
        .unwrap();

    assert_eq!(funded.status, RequestStatus::Funded);
    assert_eq!(funded.amount_funded, dec!(1000));
    assert_eq!(funded.final_apr, Some(dec!(6)));
    assert_eq!(funded.accepted_offer_id, Some(o2.id));
    assert!(funded.funded_at.is_some());
    assert!(funded.is_consistent());

    assert_eq!(offer_status(&engine, o2.id).await, OfferStatus::Accepted);
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::AutoDeclined);

    let late = engine.accept_offer(request.id, o1.id, borrower).await;
    assert!(matches!(late, Err(FundingError::Conflict(_))));

    // No new offers once funded
    let rejected = engine
        .submit_offer(request.id, Uuid::new_v4(), offer_payload(dec!(100), dec!(4)))
        .await;
    assert!(matches!(rejected, Err(FundingError::Conflict(_))));
}

#[tokio::test]
async fn test_accept_twice_conflicts() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(7)).await;

    engine
        .accept_offer(request.id, o1.id, borrower)
        .await
        .unwrap();
    let second = engine.accept_offer(request.id, o1.id, borrower).await;

    assert!(matches!(second, Err(FundingError::Conflict(_))));
    let stored = engine.requests().get_by_id(request.id).await.unwrap();
    assert_eq!(stored.accepted_offer_id, Some(o1.id));
}

#[tokio::test]
async fn test_only_borrower_can_accept() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(7)).await;

    let result = engine.accept_offer(request.id, o1.id, o1.lender_id).await;

    assert!(matches!(result, Err(FundingError::Authorization(_))));
    let stored = engine.requests().get_by_id(request.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::SeekingFunds);
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::Pending);
}

#[tokio::test]
async fn test_accept_offer_from_another_request_conflicts() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let other = seeded_request(&engine, borrower).await;
    let foreign = offer(&engine, other.id, dec!(7)).await;

    let result = engine.accept_offer(request.id, foreign.id, borrower).await;

    assert!(matches!(result, Err(FundingError::Conflict(_))));
    assert_eq!(offer_status(&engine, foreign.id).await, OfferStatus::Pending);

    let missing = engine
        .accept_offer(request.id, Uuid::new_v4(), borrower)
        .await;
    assert!(matches!(missing, Err(FundingError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_have_one_winner() {
    for _ in 0..20 {
        let (engine, _) = engine();
        let borrower = Uuid::new_v4();
        let request = seeded_request(&engine, borrower).await;
        let o1 = offer(&engine, request.id, dec!(8)).await;
        let o2 = offer(&engine, request.id, dec!(6)).await;

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.accept_offer(request.id, o1.id, borrower).await })
        };
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.accept_offer(request.id, o2.id, borrower).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let winners: Vec<&LoanRequest> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(FundingError::Conflict(_)))));

        let winner_offer = winners[0].accepted_offer_id.unwrap();
        let winning_apr = if winner_offer == o1.id { o1.apr } else { o2.apr };

        let stored = engine.requests().get_by_id(request.id).await.unwrap();
        assert_eq!(stored.accepted_offer_id, Some(winner_offer));
        assert_eq!(stored.final_apr, Some(winning_apr));
        assert_eq!(stored.amount_funded, dec!(1000));

        let offers = engine.offers().list_by_request(request.id).await.unwrap();
        let accepted = offers
            .iter()
            .filter(|o| o.status == OfferStatus::Accepted)
            .count();
        assert_eq!(accepted, 1);
    }
}

#[tokio::test]
async fn test_decline_pending_offer() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(9)).await;

    let declined = engine.decline_offer(o1.id, borrower).await.unwrap();

    assert_eq!(declined.status, OfferStatus::Declined);
    let stored = engine.requests().get_by_id(request.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::SeekingFunds);

    let again = engine.decline_offer(o1.id, borrower).await;
    assert!(matches!(again, Err(FundingError::Conflict(_))));

    // A declined offer can no longer be accepted
    let accept = engine.accept_offer(request.id, o1.id, borrower).await;
    assert!(matches!(accept, Err(FundingError::Conflict(_))));
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::Declined);
}

#[tokio::test]
async fn test_decline_accepted_offer_conflicts() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(9)).await;
    engine
        .accept_offer(request.id, o1.id, borrower)
        .await
        .unwrap();

    let result = engine.decline_offer(o1.id, borrower).await;

    assert!(matches!(result, Err(FundingError::Conflict(_))));
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::Accepted);
}

#[tokio::test]
async fn test_only_borrower_can_decline() {
    let (engine, _) = engine();
    let request = seeded_request(&engine, Uuid::new_v4()).await;
    let o1 = offer(&engine, request.id, dec!(9)).await;

    let result = engine.decline_offer(o1.id, o1.lender_id).await;

    assert!(matches!(result, Err(FundingError::Authorization(_))));
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::Pending);
}

#[tokio::test]
async fn test_transient_commit_failures_are_retried() {
    let (engine, ledger) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(5)).await;

    ledger.fail_next_commits(2).await;
    let funded = engine
        .accept_offer(request.id, o1.id, borrower)
        .await
        .unwrap();

    assert_eq!(funded.status, RequestStatus::Funded);
}

#[tokio::test]
async fn test_exhausted_retries_surface_store_unavailable() {
    let (engine, ledger) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(5)).await;

    ledger.fail_next_commits(3).await;
    let result = engine.accept_offer(request.id, o1.id, borrower).await;

    assert!(matches!(result, Err(FundingError::StoreUnavailable(_))));
    // Nothing from the aborted attempts is visible
    let stored = engine.requests().get_by_id(request.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::SeekingFunds);
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::Pending);
}

#[tokio::test]
async fn test_failed_sweep_is_finished_by_reconciler() {
    let (engine, ledger) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(8)).await;
    let o2 = offer(&engine, request.id, dec!(6)).await;
    let o3 = offer(&engine, request.id, dec!(7)).await;

    // Every sweep attempt made by accept fails
    ledger.fail_next_batches(3).await;
    let funded = engine
        .accept_offer(request.id, o2.id, borrower)
        .await
        .unwrap();
    assert_eq!(funded.status, RequestStatus::Funded);

    // Tolerated transient state: competitors still pending, but not acceptable
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::Pending);
    let late = engine.accept_offer(request.id, o1.id, borrower).await;
    assert!(matches!(late, Err(FundingError::Conflict(_))));

    let report = engine.reconcile_sweeps().await.unwrap();
    assert_eq!(report.requests_checked, 1);
    assert_eq!(report.offers_auto_declined, 2);
    assert_eq!(report.failures, 0);

    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::AutoDeclined);
    assert_eq!(offer_status(&engine, o3.id).await, OfferStatus::AutoDeclined);
    assert_eq!(offer_status(&engine, o2.id).await, OfferStatus::Accepted);

    // Nothing left to do
    let again = engine.reconcile_sweeps().await.unwrap();
    assert_eq!(again.requests_checked, 0);
}

#[tokio::test]
async fn test_sweep_is_idempotent_and_skips_unfunded() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(8)).await;

    let unfunded = engine.sweep_competing_offers(request.id).await.unwrap();
    assert_eq!(unfunded.auto_declined, 0);
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::Pending);

    let o2 = offer(&engine, request.id, dec!(6)).await;
    engine
        .accept_offer(request.id, o2.id, borrower)
        .await
        .unwrap();

    let repeat = engine.sweep_competing_offers(request.id).await.unwrap();
    assert_eq!(repeat.auto_declined, 0);
    assert_eq!(offer_status(&engine, o1.id).await, OfferStatus::AutoDeclined);
}

#[tokio::test]
async fn test_request_with_offers_and_progress() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let request = seeded_request(&engine, borrower).await;
    let o1 = offer(&engine, request.id, dec!(8)).await;
    let _o2 = offer(&engine, request.id, dec!(6)).await;

    let before = engine.get_request_with_offers(request.id).await.unwrap();
    assert_eq!(before.offers.len(), 2);
    assert_eq!(before.progress.percentage, dec!(0));

    engine
        .accept_offer(request.id, o1.id, borrower)
        .await
        .unwrap();

    let after = engine.get_request_with_offers(request.id).await.unwrap();
    assert_eq!(after.progress.percentage, dec!(100));
    assert_eq!(after.progress.amount_needed, dec!(0));
    assert!(after
        .offers
        .iter()
        .all(|o| o.status != OfferStatus::Pending));

    let missing = engine.get_request_with_offers(Uuid::new_v4()).await;
    assert!(matches!(missing, Err(FundingError::NotFound(_))));
}

#[tokio::test]
async fn test_listings_and_dashboard() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();
    let lender = Uuid::new_v4();

    let funded = seeded_request(&engine, borrower).await;
    let seeking = engine
        .submit_request(borrower, request_payload(dec!(250), dec!(12), 6))
        .await
        .unwrap();
    let _other_borrower = seeded_request(&engine, Uuid::new_v4()).await;

    let winning = engine
        .submit_offer(funded.id, lender, offer_payload(dec!(1000), dec!(6)))
        .await
        .unwrap();
    engine
        .submit_offer(seeking.id, lender, offer_payload(dec!(250), dec!(11)))
        .await
        .unwrap();
    engine
        .submit_offer(seeking.id, Uuid::new_v4(), offer_payload(dec!(200), dec!(9)))
        .await
        .unwrap();
    engine
        .accept_offer(funded.id, winning.id, borrower)
        .await
        .unwrap();

    let mine = engine.list_borrower_requests(borrower, None).await.unwrap();
    assert_eq!(mine.len(), 2);
    let still_seeking = engine
        .list_borrower_requests(borrower, Some(RequestStatus::SeekingFunds))
        .await
        .unwrap();
    assert_eq!(still_seeking.len(), 1);
    assert_eq!(still_seeking[0].id, seeking.id);

    let lender_offers = engine.list_lender_offers(lender).await.unwrap();
    assert_eq!(lender_offers.len(), 2);

    let marketplace = engine
        .list_marketplace(&RequestFilter::with_status(RequestStatus::SeekingFunds))
        .await
        .unwrap();
    assert_eq!(marketplace.total, 2);

    let dashboard = engine.borrower_dashboard(borrower).await.unwrap();
    assert_eq!(dashboard.seeking.len(), 1);
    assert_eq!(dashboard.seeking[0].pending_offers, 2);
    assert_eq!(dashboard.total_pending_offers, 2);
    assert_eq!(dashboard.funded.len(), 1);
    assert_eq!(dashboard.total_funded, dec!(1000));
    // 1000 * 6% / 12 = 5 interest, 1000 / 12 principal
    assert_eq!(dashboard.funded[0].repayment.next_payment_amount, dec!(88.33));
}

#[tokio::test]
async fn test_set_status_guards_expected_state() {
    let (engine, _) = engine();
    let request = seeded_request(&engine, Uuid::new_v4()).await;
    let o1 = offer(&engine, request.id, dec!(8)).await;

    let stale = engine
        .offers()
        .set_status(o1.id, OfferStatus::Declined, OfferStatus::Accepted)
        .await;
    assert!(matches!(stale, Err(FundingError::Conflict(_))));

    let declined = engine
        .offers()
        .set_status(o1.id, OfferStatus::Declined, OfferStatus::Pending)
        .await
        .unwrap();
    assert_eq!(declined.status, OfferStatus::Declined);

    // Terminal states never move again
    let reopened = engine
        .offers()
        .set_status(o1.id, OfferStatus::Pending, OfferStatus::Declined)
        .await;
    assert!(matches!(reopened, Err(FundingError::Conflict(_))));
}

#[tokio::test]
async fn test_marketplace_page_far_past_the_end_is_empty() {
    let (engine, _) = engine();
    seeded_request(&engine, Uuid::new_v4()).await;

    let page = engine
        .list_marketplace(&RequestFilter {
            page: Some(u32::MAX),
            limit: Some(100),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(page.total, 1);
    assert!(page.data.is_empty());
    assert!(page.page > 0);
}

#[tokio::test]
async fn test_retried_submissions_are_not_duplicated() {
    let (engine, ledger) = engine();
    let borrower = Uuid::new_v4();

    // The insert lands but its reply is lost, so the engine retries it
    ledger.lose_next_insert_replies(1).await;
    let request = seeded_request(&engine, borrower).await;

    let mine = engine.list_borrower_requests(borrower, None).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, request.id);

    ledger.lose_next_insert_replies(1).await;
    let o1 = offer(&engine, request.id, dec!(7)).await;

    let offers = engine.offers().list_by_request(request.id).await.unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].id, o1.id);
}

#[tokio::test]
async fn test_terms_beyond_stored_precision_are_rejected() {
    let (engine, _) = engine();
    let borrower = Uuid::new_v4();

    for payload in [
        request_payload(dec!(1000.00001), dec!(10), 12),
        request_payload(dec!(100000000000000000), dec!(10), 12),
        request_payload(dec!(1000), dec!(99.99999), 12),
    ] {
        let result = engine.submit_request(borrower, payload).await;
        assert!(matches!(result, Err(FundingError::Validation(_))));
    }

    let request = seeded_request(&engine, borrower).await;
    let tiny_apr = engine
        .submit_offer(request.id, Uuid::new_v4(), offer_payload(dec!(500), dec!(0.00001)))
        .await;
    assert!(matches!(tiny_apr, Err(FundingError::Validation(_))));

    // Trailing zeros do not count against the scale
    let padded = engine
        .submit_offer(request.id, Uuid::new_v4(), offer_payload(dec!(500.500000), dec!(7.50000)))
        .await
        .unwrap();
    assert_eq!(padded.apr, dec!(7.5));
}

#[tokio::test]
async fn test_reconciler_only_visits_funded_requests_with_pending_offers() {
    let (engine, ledger) = engine();
    let borrower = Uuid::new_v4();

    let clean = seeded_request(&engine, borrower).await;
    let clean_offer = offer(&engine, clean.id, dec!(5)).await;
    offer(&engine, clean.id, dec!(6)).await;
    engine
        .accept_offer(clean.id, clean_offer.id, borrower)
        .await
        .unwrap();

    let stuck = seeded_request(&engine, borrower).await;
    let stuck_offer = offer(&engine, stuck.id, dec!(5)).await;
    let leftover = offer(&engine, stuck.id, dec!(9)).await;
    ledger.fail_next_batches(3).await;
    engine
        .accept_offer(stuck.id, stuck_offer.id, borrower)
        .await
        .unwrap();

    let seeking = seeded_request(&engine, borrower).await;
    let waiting = offer(&engine, seeking.id, dec!(7)).await;

    let report = engine.reconcile_sweeps().await.unwrap();
    assert_eq!(report.requests_checked, 1);
    assert_eq!(report.offers_auto_declined, 1);

    assert_eq!(offer_status(&engine, leftover.id).await, OfferStatus::AutoDeclined);
    assert_eq!(offer_status(&engine, waiting.id).await, OfferStatus::Pending);
}
