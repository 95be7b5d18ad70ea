//! Authenticated streams: signed login, orders, fills and balances

use crate::*;
use futures::join;
use serde_json::json;
use serial_test::serial;
use sriquant_core::fixed;
use sriquant_streaming::prelude::*;
use sriquant_streaming::pro::AUTHENTICATED;
use std::time::Duration;
use url::Url;

fn assert_auth_frame(frame: &serde_json::Value) {
    assert_eq!(frame["op"], "auth");
    let args = frame["args"].as_array().expect("auth args");
    assert_eq!(args.len(), 3);
    assert_eq!(args[0], "test-api-key");
    let signature = args[2].as_str().unwrap();
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
}

mod authentication {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_auth_failure_then_fresh_retry() {
        let venue = Venue::new(test_config()).unwrap();

        let (first, (end, first_frame)) = join!(venue.exchange.authenticate(), async {
            let (end, frame) = venue.accept_with_request().await;
            assert_eq!(end.url().host_str(), Some("stream.test.local"));
            assert_auth_frame(&frame);
            end.push_json(&auth_ack(false));
            (end, frame)
        });

        assert!(matches!(first, Err(ExchangeError::AuthenticationError(_))));
        let client = venue
            .exchange
            .existing_client(&Url::parse(PRIVATE_URL).unwrap())
            .unwrap();
        assert!(!client.has_subscription(AUTHENTICATED));
        assert!(client.is_open());

        // next expiry must differ from the first
        monoio::time::sleep(Duration::from_millis(2)).await;

        let (second, second_frame) = join!(venue.exchange.authenticate(), async {
            let frame = next_request(&end).await;
            end.push_json(&auth_ack(true));
            frame
        });

        second.unwrap();
        assert_auth_frame(&second_frame);
        assert_ne!(first_frame["args"][1], second_frame["args"][1]);
        assert_ne!(first_frame["args"][2], second_frame["args"][2]);
        assert_eq!(venue.connector.attempts(), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_revoked_session_signs_again() {
        let venue = Venue::new(test_config()).unwrap();

        let (first, end) = join!(venue.exchange.authenticate(), async {
            let (end, frame) = venue.accept_with_request().await;
            assert_auth_frame(&frame);
            end.push_json(&auth_ack(true));
            end
        });
        first.unwrap();

        // unsolicited failure while nobody is waiting
        end.push_json(&auth_ack(false));
        monoio::time::sleep(Duration::from_millis(10)).await;
        let client = venue
            .exchange
            .existing_client(&Url::parse(PRIVATE_URL).unwrap())
            .unwrap();
        assert!(!client.has_subscription(AUTHENTICATED));

        let (second, frame) = join!(venue.exchange.authenticate(), async {
            let frame = next_request(&end).await;
            end.push_json(&auth_ack(true));
            frame
        });
        assert_auth_frame(&frame);
        second.unwrap();

        venue.exchange.authenticate().await.unwrap();
        assert!(end.drain().is_empty(), "authenticated session signed again");
        assert!(client.has_subscription(AUTHENTICATED));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_concurrent_authentication_shares_one_frame() {
        let venue = Venue::new(test_config()).unwrap();

        let (a, b, end) = join!(
            venue.exchange.authenticate(),
            venue.exchange.authenticate(),
            async {
                let (end, frame) = venue.accept_with_request().await;
                assert_auth_frame(&frame);
                end.push_json(&auth_ack(true));
                end
            }
        );

        a.unwrap();
        b.unwrap();
        venue.exchange.authenticate().await.unwrap();
        assert!(end.drain().is_empty(), "authenticated twice");
    }

    #[monoio::test(enable_timer = true)]
    async fn test_auth_error_code_maps_through_exception_table() {
        let venue = Venue::new(test_config()).unwrap();

        let (result, _end) = join!(venue.exchange.authenticate(), async {
            let (end, _) = venue.accept_with_request().await;
            end.push_json(&json!({"op": "auth", "code": 10004, "msg": "signature mismatch"}));
            end
        });

        assert!(matches!(result, Err(ExchangeError::AuthenticationError(_))));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_missing_credentials() {
        let mut config = test_config();
        config.credentials = None;
        let venue = Venue::new(config).unwrap();

        let result = venue.exchange.authenticate().await;
        assert!(matches!(result, Err(ExchangeError::MissingCredentials(_))));
        assert_eq!(venue.connector.attempts(), 0);
    }
}

mod orders_and_fills {
    use super::*;

    fn order(id: &str, status: &str, filled: &str) -> serde_json::Value {
        json!({
            "s": "BTC-USDT", "i": id, "c": format!("client-{id}"), "O": 1000,
            "S": "BUY", "o": "LIMIT", "p": "100", "q": "2", "z": filled, "X": status
        })
    }

    #[monoio::test(enable_timer = true)]
    async fn test_watch_orders_authenticates_then_subscribes() {
        let venue = Venue::new(test_config()).unwrap();

        let (orders, end) = join!(venue.exchange.watch_orders(None, None, None), async {
            let (end, auth) = venue.accept_with_request().await;
            assert_auth_frame(&auth);
            end.push_json(&auth_ack(true));
            let subscribe = next_request(&end).await;
            assert_eq!(subscribe["reqType"], "sub");
            assert_eq!(subscribe["dataType"], "order");
            push(&end, "order", json!([order("1", "NEW", "0")]));
            end
        });

        let orders = orders.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, "1");
        assert_eq!(orders[0].symbol, "BTC/USDT");
        assert_eq!(orders[0].status, Some(OrderStatus::Open));
        assert_eq!(orders[0].remaining, Some(fixed!(2)));

        // same order id upserts in place
        let (orders, _) = join!(venue.exchange.watch_orders(None, None, None), async {
            push(&end, "order", json!([order("1", "FILLED", "2")]));
        });
        let orders = orders.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, Some(OrderStatus::Closed));
        assert_eq!(orders[0].filled, Some(fixed!(2)));
        assert_eq!(venue.exchange.orders().len(), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_topic_error_rejects_every_order_waiter() {
        let venue = Venue::new(test_config()).unwrap();

        let (all, btc, _end) = join!(
            venue.exchange.watch_orders(None, None, None),
            venue.exchange.watch_orders(Some("BTC/USDT"), None, None),
            async {
                let (end, auth) = venue.accept_with_request().await;
                assert_auth_frame(&auth);
                end.push_json(&auth_ack(true));
                let first = next_request(&end).await;
                let second = next_request(&end).await;
                assert_eq!(first["dataType"], "order");
                assert_eq!(second["dataType"], "order");
                end.push_json(&json!({"dataType": "order", "code": 100403, "msg": "Permission denied for order stream"}));
                end
            }
        );

        assert!(matches!(all, Err(ExchangeError::PermissionDenied(_))));
        assert!(matches!(btc, Err(ExchangeError::PermissionDenied(_))));
        let client = venue
            .exchange
            .existing_client(&Url::parse(PRIVATE_URL).unwrap())
            .unwrap();
        assert!(client.is_open());
        assert!(!client.has_subscription(&hash::orders(None)));
        assert!(!client.has_subscription(&hash::orders(Some("BTC/USDT"))));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_watch_my_trades() {
        let venue = Venue::new(test_config()).unwrap();

        let (fills, _end) = join!(venue.exchange.watch_my_trades(Some("BTC/USDT"), None, None), async {
            let (end, _) = venue.accept_with_request().await;
            end.push_json(&auth_ack(true));
            let subscribe = next_request(&end).await;
            assert_eq!(subscribe["dataType"], "execution");
            push(
                &end,
                "execution",
                json!([{
                    "s": "BTC-USDT", "i": "f-1", "o": "88", "T": 1000, "S": "Sell",
                    "p": "100", "q": "0.1", "n": "0.01", "N": "USDT", "isMaker": true
                }]),
            );
            end
        });

        let fills = fills.unwrap();
        assert_eq!(fills.len(), 1);
        let fill = &fills[0];
        assert_eq!(fill.order.as_deref(), Some("88"));
        assert_eq!(fill.side, Some(Side::Sell));
        assert_eq!(fill.taker_or_maker, Some(TakerOrMaker::Maker));
        assert_eq!(fill.cost, Some(fixed!(10)));
        assert_eq!(fill.fee.as_ref().map(|fee| fee.cost), Some(fixed!(0.01)));
        assert_eq!(venue.exchange.my_trades().len(), 1);
    }
}

mod balances {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_contract_wallet_balance() {
        let venue = Venue::new(test_config()).unwrap();

        let (balance, _end) = join!(venue.exchange.watch_balance(None), async {
            let (end, _) = venue.accept_with_request().await;
            end.push_json(&auth_ack(true));
            let subscribe = next_request(&end).await;
            assert_eq!(subscribe["dataType"], "wallet");
            end.push_json(&json!({
                "topic": "wallet",
                "ts": 1672304486865i64,
                "data": [{
                    "accountType": "CONTRACT",
                    "coin": [{"coin": "usdt", "walletBalance": "100", "availableToWithdraw": "80"}]
                }]
            }));
            end
        });

        let balance = balance.unwrap();
        assert_eq!(balance.account, "contract");
        assert_eq!(balance.timestamp, Some(1672304486865));
        let usdt = balance.get("USDT").unwrap();
        assert_eq!(usdt.free, Some(fixed!(80)));
        assert_eq!(usdt.used, Some(fixed!(20)));
        assert_eq!(usdt.total, Some(fixed!(100)));
        assert_eq!(venue.exchange.balance("contract"), Some(balance));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_spot_account_balance_merges_updates() {
        let venue = Venue::new(test_config().with_private_url(SPOT_PRIVATE_URL)).unwrap();

        let (_, end) = join!(venue.exchange.watch_balance(None), async {
            let (end, _) = venue.accept_with_request().await;
            end.push_json(&auth_ack(true));
            let subscribe = next_request(&end).await;
            assert_eq!(subscribe["dataType"], "outboundAccountInfo");
            push(
                &end,
                "outboundAccountInfo",
                json!({"E": 1000, "B": [{"a": "BTC", "f": "1", "l": "0.5"}, {"a": "USDT", "f": "10", "l": "0"}]}),
            );
            end
        });

        let (balance, _) = join!(venue.exchange.watch_balance(Some("spot")), async {
            push(&end, "outboundAccountInfo", json!({"E": 2000, "B": [{"a": "BTC", "f": "2", "l": "0"}]}));
        });

        let balance = balance.unwrap();
        assert_eq!(balance.account, "spot");
        assert_eq!(balance.get("BTC").unwrap().total, Some(fixed!(2)));
        assert_eq!(balance.get("USDT").unwrap().free, Some(fixed!(10)));
    }
}

mod env_credentials {
    use super::*;

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        std::env::set_var("SRIQUANT_API_KEY", "env-key");
        std::env::set_var("SRIQUANT_API_SECRET", "env-secret");

        let config = ExchangeConfig::new(PUBLIC_URL).with_env_credentials().unwrap();
        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.api_key, "env-key");
        assert!(!format!("{credentials:?}").contains("env-secret"));

        std::env::remove_var("SRIQUANT_API_KEY");
        std::env::remove_var("SRIQUANT_API_SECRET");
    }

    #[test]
    #[serial]
    fn test_missing_env_credentials() {
        std::env::remove_var("SRIQUANT_API_KEY");
        std::env::remove_var("SRIQUANT_API_SECRET");

        assert!(matches!(
            Credentials::from_env(),
            Err(ExchangeError::MissingCredentials(_))
        ));
    }
}
