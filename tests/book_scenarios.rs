//! Walk-through of a single bid level being built, amended and emptied

use l3_market_data::error::NotFoundReason;
use l3_market_data::{BookError, L3OrderBook, Level, LobEvent, OrderId, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn insert(id: u64, price: Decimal, size: Decimal) -> LobEvent {
    LobEvent::Insert {
        order_id: OrderId(id),
        price,
        size,
        side: Side::Buy,
    }
}

fn delete(id: u64) -> LobEvent {
    LobEvent::Delete {
        order_id: OrderId(id),
    }
}

fn update(id: u64, price: Decimal, size: Decimal, side: Side) -> LobEvent {
    LobEvent::Update {
        order_id: OrderId(id),
        price,
        size,
        side,
    }
}

fn five_bids_at_100() -> L3OrderBook {
    let mut book = L3OrderBook::new("tBTCUSD");
    for (id, size) in [(1, dec!(10)), (2, dec!(20)), (3, dec!(30)), (4, dec!(40)), (5, dec!(50))] {
        book.apply(&insert(id, dec!(100), size)).unwrap();
    }
    book
}

#[test]
fn test_level_lifecycle() {
    // five orders stacked on one price
    let mut book = five_bids_at_100();
    assert_eq!(book.level_size(Side::Buy, dec!(100)).unwrap(), Some(dec!(150)));
    assert_eq!(book.best_bid(), Some(Level { price: dec!(100), size: dec!(150) }));

    // delete from the middle of the queue
    book.apply(&delete(3)).unwrap();
    assert_eq!(book.level_size(Side::Buy, dec!(100)).unwrap(), Some(dec!(120)));
    assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(100)));

    // size amendment at the same price
    book.apply(&update(1, dec!(100), dec!(40), Side::Buy)).unwrap();
    assert_eq!(book.level_size(Side::Buy, dec!(100)).unwrap(), Some(dec!(130)));
    assert_eq!(book.best_bid(), Some(Level { price: dec!(100), size: dec!(130) }));

    // a better price takes over the top
    book.apply(&insert(6, dec!(200), dec!(40))).unwrap();
    assert_eq!(book.best_bid(), Some(Level { price: dec!(200), size: dec!(40) }));

    // and leaves no trace once it is gone
    book.apply(&delete(6)).unwrap();
    assert_eq!(book.level_size(Side::Buy, dec!(200)).unwrap(), None);
    assert_eq!(book.level_count(Side::Buy), 1);
    assert_eq!(book.best_bid(), Some(Level { price: dec!(100), size: dec!(130) }));

    book.verify_integrity().unwrap();
}

#[test]
fn test_delete_of_unknown_order() {
    let mut book = five_bids_at_100();
    assert_eq!(
        book.apply(&delete(42)),
        Err(BookError::OrderNotFound {
            order_id: OrderId(42),
            reason: NotFoundReason::NotResting,
        })
    );
    assert_eq!(book.order_count(), 5);
}

#[test]
fn test_update_to_other_side() {
    let mut book = five_bids_at_100();
    assert_eq!(
        book.apply(&update(2, dec!(100), dec!(20), Side::Sell)),
        Err(BookError::UnsupportedSideChange {
            order_id: OrderId(2),
            from: Side::Buy,
            to: Side::Sell,
        })
    );
    assert_eq!(book.level_size(Side::Buy, dec!(100)).unwrap(), Some(dec!(150)));
    book.verify_integrity().unwrap();
}

#[test]
fn test_queries_are_repeatable() {
    let book = five_bids_at_100();
    assert_eq!(book.depth(Side::Buy, 10).unwrap(), book.depth(Side::Buy, 10).unwrap());
    assert_eq!(book.top_of_book(Side::Buy), book.top_of_book(Side::Buy));
    assert!(book.depth(Side::Sell, 10).unwrap().is_empty());
    assert_eq!(book.top_of_book(Side::Sell), None);
}

#[test]
fn test_id_can_return_after_delete() {
    let mut book = five_bids_at_100();
    book.apply(&delete(5)).unwrap();
    book.apply(&insert(5, dec!(99), dec!(1))).unwrap();

    assert_eq!(book.order(OrderId(5)).map(|o| o.price), Some(dec!(99)));
    assert_eq!(book.level_count(Side::Buy), 2);
    book.verify_integrity().unwrap();
}

#[test]
fn test_zero_level_is_rejected_without_side_effects() {
    let mut book = L3OrderBook::new("tBTCUSD");
    book.apply(&insert(1, dec!(100), dec!(5))).unwrap();

    assert_eq!(
        book.apply(&insert(2, dec!(99), dec!(0))),
        Err(BookError::EmptyLevel {
            side: Side::Buy,
            price: dec!(99),
        })
    );
    assert!(book.order(OrderId(2)).is_none());
    assert_eq!(book.depth(Side::Buy, 5).unwrap(), vec![Level { price: dec!(100), size: dec!(5) }]);

    // unrelated events keep working
    book.apply(&delete(1)).unwrap();
    assert!(book.is_empty());
    assert_eq!(book.best_bid(), None);
    book.verify_integrity().unwrap();
}
