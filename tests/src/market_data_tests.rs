//! Public market-data streams end to end: subscribe frame, push, resolve

use crate::*;
use futures::join;
use rstest::rstest;
use serde_json::json;
use sriquant_core::fixed;
use sriquant_streaming::prelude::*;
use sriquant_streaming::ExceptionKind;
use url::Url;

mod trades {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_watch_trades_normal_flow() {
        let venue = Venue::new(test_config()).unwrap();

        let (trades, _end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            async {
                let (end, request) = venue.accept_with_request().await;
                assert_eq!(request["reqType"], "sub");
                assert_eq!(request["dataType"], "market.trade.detail.BTC-USDT");
                assert_eq!(request["id"], "1");
                end.push_json(&trade_push("BTC-USDT", "t-1", 1672304486865, "16578.50", "0.002"));
                end
            }
        );

        let trades = trades.unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.id.as_deref(), Some("t-1"));
        assert_eq!(trade.symbol, "BTC/USDT");
        assert_eq!(trade.side, Some(Side::Buy));
        assert_eq!(trade.price, fixed!(16578.50));
        assert_eq!(trade.amount, fixed!(0.002));
        assert_eq!(trade.timestamp, Some(1672304486865));
        assert_eq!(venue.exchange.trades("BTC/USDT"), trades);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_concurrent_watches_send_one_subscribe() {
        let venue = Venue::new(test_config()).unwrap();

        let (a, b, c, end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            venue.exchange.watch_trades("BTC/USDT", None, None),
            venue.exchange.watch_trades("BTC/USDT", None, None),
            async {
                let (end, request) = venue.accept_with_request().await;
                assert_eq!(request["dataType"], "market.trade.detail.BTC-USDT");
                end.push_json(&trade_push("BTC-USDT", "t-1", 1000, "100", "1"));
                end
            }
        );

        let a = a.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert!(end.drain().is_empty(), "duplicate subscribe frames were sent");
        assert_eq!(venue.connector.attempts(), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_streams_share_one_connection_per_url() {
        let venue = Venue::new(test_config()).unwrap();

        let (trades, ticker, _end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            venue.exchange.watch_ticker("ETH/USDT"),
            async {
                let (end, first) = venue.accept_with_request().await;
                let second = next_request(&end).await;
                let mut topics = vec![first["dataType"].clone(), second["dataType"].clone()];
                topics.sort_by_key(|t| t.to_string());
                assert_eq!(
                    topics,
                    vec![json!("market.ticker.ETH-USDT"), json!("market.trade.detail.BTC-USDT")]
                );
                end.push_json(&trade_push("BTC-USDT", "t-1", 1000, "100", "1"));
                push(&end, "market.ticker.ETH-USDT", json!({"c": "2000", "o": "1900", "E": 1000}));
                end
            }
        );

        assert_eq!(trades.unwrap().len(), 1);
        assert_eq!(ticker.unwrap().last, Some(fixed!(2000)));
        assert_eq!(venue.connector.attempts(), 1);
        assert!(venue.server.try_accept().is_none());
    }

    #[monoio::test(enable_timer = true)]
    async fn test_new_updates_return_only_unread_trades() {
        let venue = Venue::new(test_config().with_new_updates(true)).unwrap();

        let (first, end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            async {
                let (end, _) = venue.accept_with_request().await;
                end.push_json(&json!({
                    "dataType": "market.trade.detail.BTC-USDT",
                    "data": {"trades": [
                        {"i": "t-1", "T": 1000, "S": "Buy", "p": "100", "v": "1"},
                        {"i": "t-2", "T": 1001, "S": "Sell", "p": "101", "v": "2"}
                    ]}
                }));
                end
            }
        );
        assert_eq!(first.unwrap().len(), 2);

        let (second, _) = join!(venue.exchange.watch_trades("BTC/USDT", None, None), async {
            end.push_json(&trade_push("BTC-USDT", "t-3", 1002, "102", "3"));
        });
        let second = second.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id.as_deref(), Some("t-3"));
        assert_eq!(venue.exchange.trades("BTC/USDT").len(), 3);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_trades_limit_keeps_most_recent() {
        let venue = Venue::new(test_config()).unwrap();

        let (trades, _end) = join!(
            venue.exchange.watch_trades("BTC/USDT", Some(1001), Some(1)),
            async {
                let (end, _) = venue.accept_with_request().await;
                end.push_json(&json!({
                    "dataType": "market.trade.detail.BTC-USDT",
                    "data": {"trades": [
                        {"i": "t-1", "T": 1000, "p": "100", "v": "1"},
                        {"i": "t-2", "T": 1001, "p": "101", "v": "1"},
                        {"i": "t-3", "T": 1002, "p": "102", "v": "1"}
                    ]}
                }));
                end
            }
        );

        let trades = trades.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id.as_deref(), Some("t-3"));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_oversized_trade_values_do_not_crash_the_stream() {
        let venue = Venue::new(test_config()).unwrap();

        let (trades, end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            async {
                let (end, _) = venue.accept_with_request().await;
                end.push_json(&trade_push("BTC-USDT", "t-1", 1000, "100000000000000000", "1000000000000"));
                end
            }
        );

        let trades = trades.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, fixed!(100000000000000000));
        assert_eq!(trades[0].cost, None);

        let (more, _end) = join!(venue.exchange.watch_trades("BTC/USDT", None, None), async {
            end.push_json(&trade_push("BTC-USDT", "t-2", 1001, "100", "2"));
            end
        });
        let more = more.unwrap();
        assert_eq!(more.last().and_then(|t| t.cost), Some(fixed!(200)));
    }
}

mod order_book {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_snapshot_then_delta() {
        let venue = Venue::new(test_config()).unwrap();

        let (snapshot, end) = join!(venue.exchange.watch_order_book("BTC/USDT", None), async {
            let (end, request) = venue.accept_with_request().await;
            assert_eq!(request["dataType"], "market.depth.BTC-USDT.step0.level100");
            end.push_json(&depth_push(
                "BTC-USDT",
                "snapshot",
                1,
                json!([["100", "1"], ["99", "2"]]),
                json!([["101", "1"]]),
            ));
            end
        });
        let snapshot = snapshot.unwrap();
        assert_eq!(
            snapshot.bids.levels(),
            vec![(fixed!(100), fixed!(1)), (fixed!(99), fixed!(2))]
        );
        assert_eq!(snapshot.asks.levels(), vec![(fixed!(101), fixed!(1))]);

        let (book, _) = join!(venue.exchange.watch_order_book("BTC/USDT", None), async {
            end.push_json(&depth_push(
                "BTC-USDT",
                "delta",
                2,
                json!([["99", "0"]]),
                json!([["101", "2"]]),
            ));
        });
        let book = book.unwrap();
        assert_eq!(book.bids.levels(), vec![(fixed!(100), fixed!(1))]);
        assert_eq!(book.asks.levels(), vec![(fixed!(101), fixed!(2))]);
        assert_eq!(book.timestamp, Some(2));
        assert_eq!(book.spread(), Some(fixed!(1)));
        assert!(end.drain().is_empty(), "second watch must not resubscribe");
    }

    #[monoio::test(enable_timer = true)]
    async fn test_depth_is_truncated_to_limit() {
        let venue = Venue::new(test_config()).unwrap();
        let bids: Vec<_> = (0..8).map(|i| json!([format!("{}", 100 - i), "1"])).collect();

        let (book, _end) = join!(venue.exchange.watch_order_book("BTC/USDT", Some(5)), async {
            let (end, request) = venue.accept_with_request().await;
            assert_eq!(request["dataType"], "market.depth.BTC-USDT.step0.level5");
            end.push_json(&json!({
                "topic": "market.depth.BTC-USDT.step0.level5",
                "type": "snapshot",
                "ts": 1,
                "data": {"s": "BTC-USDT", "bids": bids, "asks": []}
            }));
            end
        });

        let book = book.unwrap();
        assert_eq!(book.bids.len(), 5);
        assert_eq!(book.best_bid(), Some((fixed!(100), fixed!(1))));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_rejects_unsupported_depth() {
        let venue = Venue::new(test_config()).unwrap();
        let result = venue.exchange.watch_order_book("BTC/USDT", Some(7)).await;
        assert!(matches!(result, Err(ExchangeError::BadRequest(_))));
        assert_eq!(venue.connector.attempts(), 0);
    }
}

mod ticker_and_ohlcv {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_watch_ticker() {
        let venue = Venue::new(test_config()).unwrap();

        let (ticker, _end) = join!(venue.exchange.watch_ticker("BTC/USDT"), async {
            let (end, request) = venue.accept_with_request().await;
            assert_eq!(request["dataType"], "market.ticker.BTC-USDT");
            push(
                &end,
                "market.ticker.BTC-USDT",
                json!({"c": "101", "o": "100", "h": "102", "l": "99", "v": "5", "E": 1672304486865i64}),
            );
            end
        });

        let ticker = ticker.unwrap();
        assert_eq!(ticker.symbol, "BTC/USDT");
        assert_eq!(ticker.last, Some(fixed!(101)));
        assert_eq!(ticker.change, Some(fixed!(1)));
        assert_eq!(ticker.datetime.as_deref(), Some("2022-12-29T09:01:26.865Z"));
        assert_eq!(venue.exchange.ticker("BTC/USDT"), Some(ticker));
    }

    #[rstest]
    #[case("1m", "1")]
    #[case("1h", "60")]
    #[case("1d", "D")]
    #[monoio::test(enable_timer = true)]
    async fn test_ohlcv_topic_uses_exchange_interval(#[case] timeframe: &str, #[case] interval: &str) {
        let venue = Venue::new(test_config()).unwrap();
        let topic = format!("market.kline.BTC-USDT.{interval}");

        let (candles, _end) = join!(
            venue.exchange.watch_ohlcv("BTC/USDT", timeframe, None, None),
            async {
                let (end, request) = venue.accept_with_request().await;
                assert_eq!(request["dataType"], topic.as_str());
                push(
                    &end,
                    &topic,
                    json!([{"t": 60000, "o": "1", "h": "3", "l": "0.5", "c": "2", "v": "10"}]),
                );
                end
            }
        );

        let candles = candles.unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, fixed!(2));
        assert_eq!(venue.exchange.ohlcv("BTC/USDT", timeframe), candles);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_candle_updates_replace_same_timestamp() {
        let venue = Venue::new(test_config()).unwrap();
        let topic = "market.kline.BTC-USDT.1";

        let (_, end) = join!(venue.exchange.watch_ohlcv("BTC/USDT", "1m", None, None), async {
            let (end, _) = venue.accept_with_request().await;
            push(&end, topic, json!([60000, "1", "3", "0.5", "2", "10"]));
            end
        });
        let (candles, _) = join!(venue.exchange.watch_ohlcv("BTC/USDT", "1m", None, None), async {
            push(&end, topic, json!([60000, "1", "4", "0.5", "3.5", "12"]));
        });

        let candles = candles.unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].high, fixed!(4));
        assert_eq!(candles[0].volume, fixed!(12));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_unknown_timeframe_is_not_supported() {
        let venue = Venue::new(test_config()).unwrap();
        let result = venue.exchange.watch_ohlcv("BTC/USDT", "7m", None, None).await;
        assert!(matches!(result, Err(ExchangeError::NotSupported(_))));
        assert_eq!(venue.connector.attempts(), 0);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_unknown_symbol() {
        let venue = Venue::new(test_config()).unwrap();
        let result = venue.exchange.watch_ticker("DOGE/USDT").await;
        assert!(matches!(result, Err(ExchangeError::BadSymbol(_))));
    }
}

mod exchange_errors {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_error_frame_rejects_only_its_subscription() {
        let venue = Venue::new(test_config()).unwrap();

        let (trades, ticker, _end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            venue.exchange.watch_ticker("BTC/USDT"),
            async {
                let (end, first) = venue.accept_with_request().await;
                let second = next_request(&end).await;
                let ticker_request = if first["dataType"] == "market.ticker.BTC-USDT" {
                    first
                } else {
                    second
                };
                end.push_json(&json!({
                    "id": ticker_request["id"],
                    "code": 80015,
                    "msg": "Invalid symbol BTC-USDT"
                }));
                end.push_json(&trade_push("BTC-USDT", "t-1", 1000, "100", "1"));
                end
            }
        );

        assert!(matches!(ticker, Err(ExchangeError::BadSymbol(_))));
        assert_eq!(trades.unwrap().len(), 1);

        let client = venue
            .exchange
            .existing_client(&Url::parse(PUBLIC_URL).unwrap())
            .unwrap();
        assert!(client.is_open());
        assert!(!client.has_subscription(&hash::ticker("BTC/USDT")));
        assert!(client.has_subscription(&hash::trades("BTC/USDT")));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_exact_code_wins_over_broad_message() {
        let mut config = test_config();
        config
            .exceptions
            .exact
            .insert("100400".to_string(), ExceptionKind::RateLimitExceeded);
        let venue = Venue::new(config).unwrap();

        let (ticker, _end) = join!(venue.exchange.watch_ticker("BTC/USDT"), async {
            let (end, request) = venue.accept_with_request().await;
            end.push_json(&json!({
                "id": request["id"],
                "code": 100400,
                "msg": "invalid symbol"
            }));
            end
        });

        assert!(matches!(ticker, Err(ExchangeError::RateLimitExceeded(_))));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_connection_fatal_code_tears_down_the_client() {
        let mut config = test_config();
        config
            .exceptions
            .exact
            .insert("10016".to_string(), ExceptionKind::NetworkError);
        let venue = Venue::new(config).unwrap();

        let (trades, ticker, end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            venue.exchange.watch_ticker("ETH/USDT"),
            async {
                let (end, request) = venue.accept_with_request().await;
                let _ = next_request(&end).await;
                end.push_json(&json!({"id": request["id"], "code": 10016, "msg": "service restarting"}));
                end
            }
        );

        assert!(matches!(trades, Err(ExchangeError::NetworkError(_))));
        assert!(matches!(ticker, Err(ExchangeError::NetworkError(_))));
        assert!(venue
            .exchange
            .existing_client(&Url::parse(PUBLIC_URL).unwrap())
            .is_none());
        assert_eq!(end.recv().await, Some(sriquant_streaming::OutboundFrame::Close(1000)));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_uncorrelated_error_reaches_every_waiter() {
        let venue = Venue::new(test_config()).unwrap();

        let (trades, ticker, _end) = join!(
            venue.exchange.watch_trades("BTC/USDT", None, None),
            venue.exchange.watch_ticker("ETH/USDT"),
            async {
                let (end, _) = venue.accept_with_request().await;
                let _ = next_request(&end).await;
                end.push_json(&json!({"code": 100500, "msg": "internal error"}));
                end
            }
        );

        assert!(matches!(trades, Err(ExchangeError::ExchangeReported(_))));
        assert!(matches!(ticker, Err(ExchangeError::ExchangeReported(_))));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_malformed_frames_are_ignored() {
        let venue = Venue::new(test_config()).unwrap();

        let (trades, _end) = join!(venue.exchange.watch_trades("BTC/USDT", None, None), async {
            let (end, _) = venue.accept_with_request().await;
            end.push_text("{not json");
            end.push_json(&json!({"dataType": "market.trade.detail.BTC-USDT", "data": {"trades": [{"v": "1"}]}}));
            end.push_json(&trade_push("BTC-USDT", "t-1", 1000, "100", "1"));
            end
        });

        assert_eq!(trades.unwrap().len(), 1);
    }
}

mod unwatch {
    use super::*;

    #[monoio::test(enable_timer = true)]
    async fn test_unwatch_rejects_waiter_and_unsubscribes() {
        let venue = Venue::new(test_config()).unwrap();

        let (ticker, end) = join!(venue.exchange.watch_ticker("BTC/USDT"), async {
            let (end, subscribe) = venue.accept_with_request().await;
            venue.exchange.unwatch_ticker("BTC/USDT").unwrap();
            let unsubscribe = next_request(&end).await;
            assert_eq!(unsubscribe["reqType"], "unsub");
            assert_eq!(unsubscribe["dataType"], subscribe["dataType"]);
            assert_ne!(unsubscribe["id"], subscribe["id"]);
            end
        });

        assert!(matches!(ticker, Err(ExchangeError::Unsubscribed(_))));
        assert!(venue.exchange.ticker("BTC/USDT").is_none());

        let (_, resubscribe) = join!(
            async {
                let _ = monoio::time::timeout(
                    std::time::Duration::from_millis(20),
                    venue.exchange.watch_ticker("BTC/USDT"),
                )
                .await;
            },
            next_request(&end)
        );
        assert_eq!(resubscribe["reqType"], "sub");
    }

    #[monoio::test(enable_timer = true)]
    async fn test_unwatch_without_client_is_noop() {
        let venue = Venue::new(test_config()).unwrap();
        venue.exchange.unwatch_trades("BTC/USDT").unwrap();
        venue.exchange.unwatch_ohlcv("BTC/USDT", "1m").unwrap();
        assert_eq!(venue.connector.attempts(), 0);
    }
}
