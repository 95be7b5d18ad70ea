//! Property tests for the bounded caches and the order book

use proptest::prelude::*;
use sriquant_core::Fixed;
use sriquant_streaming::cache::{filter_by_since_limit, ArrayCache, ArrayCacheBySymbolById, ArrayCacheByTimestamp};
use sriquant_streaming::{BookUpdate, Ohlcv, OrderBook, Trade};

fn trade(n: usize) -> Trade {
    Trade {
        id: Some(format!("t-{n}")),
        order: None,
        symbol: "BTC/USDT".to_string(),
        timestamp: Some(n as i64),
        datetime: None,
        side: None,
        price: Fixed::from_i64(100),
        amount: Fixed::ONE,
        cost: None,
        taker_or_maker: None,
        fee: None,
    }
}

fn candle(timestamp: i64, close: i64) -> Ohlcv {
    Ohlcv {
        symbol: "BTC/USDT".to_string(),
        timestamp,
        open: Fixed::ONE,
        high: Fixed::from_i64(close.max(1)),
        low: Fixed::ONE,
        close: Fixed::from_i64(close),
        volume: Fixed::ONE,
    }
}

fn levels(raw: &[(u32, u32)]) -> Vec<(Fixed, Fixed)> {
    raw.iter()
        .map(|&(price, size)| (Fixed::from_i64(i64::from(price)), Fixed::from_i64(i64::from(size))))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn test_array_cache_is_bounded_and_keeps_newest(capacity in 1usize..64, count in 0usize..200) {
        let mut cache = ArrayCache::new(capacity);
        for n in 0..count {
            cache.append(trade(n));
        }

        prop_assert_eq!(cache.len(), count.min(capacity));
        let ids: Vec<usize> = cache.iter().map(|t| t.timestamp.unwrap() as usize).collect();
        let expected: Vec<usize> = (count.saturating_sub(capacity)..count).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn test_timestamp_cache_holds_one_slot_per_timestamp(
        capacity in 1usize..32,
        stamps in prop::collection::vec(0i64..50, 0..120),
    ) {
        let mut cache = ArrayCacheByTimestamp::new(capacity);
        for (i, &ts) in stamps.iter().enumerate() {
            cache.append(candle(ts, i as i64));
        }

        let stored: Vec<i64> = cache.iter().map(|c| c.timestamp).collect();
        let mut unique = stored.clone();
        unique.sort_unstable();
        unique.dedup();
        prop_assert_eq!(unique.len(), stored.len());
        prop_assert!(stored.len() <= capacity);
    }

    #[test]
    fn test_symbol_id_cache_upserts(capacity in 1usize..32, ids in prop::collection::vec(0usize..20, 0..100)) {
        let mut cache = ArrayCacheBySymbolById::new(capacity);
        for &id in &ids {
            cache.append(trade(id));
        }

        let mut distinct = ids.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(cache.len(), distinct.len().min(capacity));
        if let Some(&last) = ids.last() {
            let newest = cache.iter().last().and_then(|t| t.id.clone());
            prop_assert_eq!(newest, Some(format!("t-{last}")));
        }
    }

    #[test]
    fn test_filter_limit_takes_tail(count in 0usize..50, limit in 0usize..60) {
        let items: Vec<Trade> = (0..count).map(trade).collect();
        let filtered = filter_by_since_limit(&items, None, Some(limit));

        prop_assert_eq!(filtered.len(), count.min(limit));
        if let Some(last) = filtered.last() {
            prop_assert_eq!(last.timestamp, Some(count as i64 - 1));
        }
    }

    #[test]
    fn test_order_book_sides_stay_sorted(
        snapshot_bids in prop::collection::vec((1u32..1000, 0u32..10), 0..40),
        snapshot_asks in prop::collection::vec((1u32..1000, 0u32..10), 0..40),
        delta_bids in prop::collection::vec((1u32..1000, 0u32..10), 0..40),
        delta_asks in prop::collection::vec((1u32..1000, 0u32..10), 0..40),
    ) {
        let mut book = OrderBook::new("BTC/USDT", None);
        prop_assert!(book.reset(BookUpdate {
            symbol: "BTC/USDT".to_string(),
            bids: levels(&snapshot_bids),
            asks: levels(&snapshot_asks),
            timestamp: Some(1),
            nonce: None,
        }), "book.reset(snapshot) returned false");
        prop_assert!(book.apply_delta(BookUpdate {
            symbol: "BTC/USDT".to_string(),
            bids: levels(&delta_bids),
            asks: levels(&delta_asks),
            timestamp: Some(2),
            nonce: None,
        }), "book.apply_delta(delta) returned false");

        let bids = book.bids.levels();
        let asks = book.asks.levels();
        prop_assert!(bids.windows(2).all(|w| w[0].0 > w[1].0));
        prop_assert!(asks.windows(2).all(|w| w[0].0 < w[1].0));
        prop_assert!(bids.iter().chain(asks.iter()).all(|(_, size)| !size.is_zero()));
    }
}
