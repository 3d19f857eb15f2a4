use common::{AccountId, ErrorKind};
use proptest::prelude::*;
use risk::{RiskConfig, RiskEngine};
use tokio::sync::mpsc;

proptest! {
    /// Recording sends and errors with randomized counts and recipient ids
    /// must never panic, regardless of how extreme the inputs are.
    #[test]
    fn risk_engine_never_panics_on_extreme_inputs(
        send_count in 0u32..300,
        error_count in 0u32..300,
        recipient_spread in 1i64..50_000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (tx, _rx) = mpsc::channel(1024);
            let engine = RiskEngine::new(RiskConfig::default(), tx);
            let account: AccountId = "+15550000000".into();

            for i in 0..send_count {
                let recipient = (i as i64) % recipient_spread;
                engine
                    .record_send(&account, &format!("Hello {i}"), recipient)
                    .await;
            }
            for i in 0..error_count {
                let kind = match i % 5 {
                    0 => ErrorKind::Floodwait,
                    1 => ErrorKind::UserBlocked,
                    2 => ErrorKind::PrivacyRestricted,
                    3 => ErrorKind::InvalidUser,
                    _ => ErrorKind::Generic,
                };
                engine.record_error(&account, kind).await;
            }

            let status = engine.get_status(&account).await;
            prop_assert!(status.ban_probability >= 0.0 && status.ban_probability <= 1.0);
            Ok(())
        }).unwrap();
    }
}
