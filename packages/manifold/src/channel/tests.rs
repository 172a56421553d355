use crate::{error::ChannelError, Callback, Channel};
use std::sync::{Arc, Mutex};
use tokio::task::yield_now;

// give background tasks (dispatch loop, edits, spawned operations) time to run through.
async fn settle() {
    for _ in 0..64 {
        yield_now().await;
    }
}

#[tokio::test]
async fn second_send_waits_for_first_delivery() {
    let channel = Channel::new(1);
    let sender = channel.new_sender().await;
    let getter = channel.new_getter().await;

    sender.send(1).await.unwrap();
    let blocked_sender = sender.clone();
    let second = tokio::spawn(async move { blocked_sender.send(2).await });
    settle().await;
    assert!(!second.is_finished());

    assert_eq!(getter.get().await.unwrap(), 1);
    settle().await;
    assert!(second.is_finished());
    second.await.unwrap().unwrap();
    assert_eq!(getter.get().await.unwrap(), 2);
}

#[tokio::test]
async fn broadcasts_to_every_getter() {
    let channel = Channel::new(4);
    let sender = channel.new_sender().await;
    let getters = [
        channel.new_getter().await,
        channel.new_getter().await,
        channel.new_getter().await,
    ];

    for value in 1..=3 {
        sender.send(value).await.unwrap();
    }
    for getter in &getters {
        for expected in 1..=3 {
            assert_eq!(getter.get().await.unwrap(), expected);
        }
    }
}

#[tokio::test]
async fn alternates_across_senders_in_attach_order() {
    let channel = Channel::new(4);
    let first = channel.new_sender().await;
    let second = channel.new_sender().await;
    let getter = channel.new_getter().await;

    first.send("a1").await.unwrap();
    first.send("a2").await.unwrap();
    second.send("b1").await.unwrap();
    second.send("b2").await.unwrap();

    let mut out = Vec::new();
    for _ in 0..4 {
        out.push(getter.get().await.unwrap());
    }
    // one value per sender per dispatch pass
    assert_eq!(out, vec!["a1", "b1", "a2", "b2"]);
}

#[tokio::test]
async fn get_forever_ends_when_getter_detaches() {
    let channel = Channel::new(10);
    let sender = channel.new_sender().await;
    let getter = channel.new_getter().await;

    for value in 1..=5 {
        sender.send(value).await.unwrap();
    }

    let consumer = getter.clone();
    let collected = tokio::spawn(async move {
        let mut deliveries = consumer.get_forever();
        let mut out = Vec::new();
        while let Some(delivery) = deliveries.next().await {
            out.push(delivery.unwrap());
        }
        out
    });

    settle().await;
    getter.detach().await;
    assert_eq!(collected.await.unwrap(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn iterate_pending_drains_buffered_values_synchronously() {
    let channel = Channel::new(5);
    let sender = channel.new_sender().await;
    let active = channel.new_getter().await;
    let passive = channel.new_getter().await;

    for value in 1..=5 {
        sender.send(value).await.unwrap();
    }
    // the active getter's gets drive dispatch; the passive getter's buffer fills as a side effect
    for expected in 1..=5 {
        assert_eq!(active.get().await.unwrap(), expected);
    }
    settle().await;

    assert_eq!(
        passive.iterate_pending().collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5],
    );
    assert_eq!(passive.iterate_pending().count(), 0);
}

#[tokio::test]
async fn drain_takes_one_value_per_sender_per_pass() {
    let channel = Channel::new(50);
    let sender = channel.new_sender().await;
    for value in 0..50 {
        sender.send(value).await.unwrap();
    }

    for expected in 0..50 {
        let mut drain = channel.drain();
        assert_eq!(drain.next().await, Some(expected));
        assert_eq!(drain.next().await, None);
    }
    assert_eq!(channel.drain().next().await, None);
}

#[tokio::test]
async fn drain_scans_senders_in_attach_order() {
    let channel = Channel::new(4);
    let first = channel.new_sender().await;
    let second = channel.new_sender().await;
    first.send(1).await.unwrap();
    first.send(2).await.unwrap();
    second.send(10).await.unwrap();

    let mut drain = channel.drain();
    assert_eq!(drain.next().await, Some(1));
    assert_eq!(drain.next().await, Some(10));
    assert_eq!(drain.next().await, None);

    let mut drain = channel.drain();
    assert_eq!(drain.next().await, Some(2));
    assert_eq!(drain.next().await, None);
}

#[tokio::test]
async fn callbacks_fire_on_delivery() {
    let channel = Channel::new(4);
    let sender = channel.new_sender().await;
    let getter = channel.new_getter().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = seen.clone();
    let immediate = getter.add_callback(Callback::immediate(move |value| {
        seen_by_callback.lock().unwrap().push(value);
    }));

    let (deferred_tx, mut deferred_rx) = tokio::sync::mpsc::unbounded_channel();
    getter.add_callback(Callback::deferred(move |value| {
        let deferred_tx = deferred_tx.clone();
        async move {
            let _ = deferred_tx.send(value);
        }
    }));

    sender.send(1).await.unwrap();
    sender.send(2).await.unwrap();
    assert_eq!(getter.get().await.unwrap(), 1);
    assert_eq!(getter.get().await.unwrap(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(deferred_rx.recv().await, Some(1));
    assert_eq!(deferred_rx.recv().await, Some(2));

    assert!(getter.remove_callback(immediate));
    assert!(!getter.remove_callback(immediate));
    sender.send(3).await.unwrap();
    assert_eq!(getter.get().await.unwrap(), 3);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(deferred_rx.recv().await, Some(3));
}

#[tokio::test]
async fn callback_panic_does_not_poison_delivery() {
    let channel = Channel::new(4);
    let sender = channel.new_sender().await;
    let getter = channel.new_getter().await;

    getter.add_callback(Callback::immediate(|_value: i32| panic!("callback blew up")));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = seen.clone();
    getter.add_callback(Callback::immediate(move |value| {
        seen_by_callback.lock().unwrap().push(value);
    }));

    sender.send(7).await.unwrap();
    assert_eq!(getter.get().await.unwrap(), 7);
    assert_eq!(*seen.lock().unwrap(), vec![7]);

    // the panicking callback stays registered and keeps failing in isolation
    sender.send(8).await.unwrap();
    assert_eq!(getter.get().await.unwrap(), 8);
    assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
}

#[tokio::test]
async fn remove_callback_during_delivery_sticks() {
    let channel = Channel::new(4);
    let sender = channel.new_sender().await;
    let getter = channel.new_getter().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = seen.clone();
    let recorder = getter.add_callback(Callback::immediate(move |value| {
        seen_by_callback.lock().unwrap().push(value);
    }));
    // fires after the recorder on the same delivery, while the entries are taken out
    let removals = Arc::new(Mutex::new(Vec::new()));
    let removals_by_callback = removals.clone();
    let remover_getter = getter.clone();
    getter.add_callback(Callback::immediate(move |_value| {
        removals_by_callback
            .lock()
            .unwrap()
            .push(remover_getter.remove_callback(recorder));
    }));

    sender.send(1).await.unwrap();
    assert_eq!(getter.get().await.unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert_eq!(*removals.lock().unwrap(), vec![true]);

    sender.send(2).await.unwrap();
    assert_eq!(getter.get().await.unwrap(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert_eq!(*removals.lock().unwrap(), vec![true, false]);
    assert!(!getter.remove_callback(recorder));
}

#[tokio::test]
async fn detach_cancels_blocked_send() {
    let channel = Channel::new(1);
    let sender = channel.new_sender().await;

    sender.send(1).await.unwrap();
    let blocked_sender = sender.clone();
    let blocked = tokio::spawn(async move { blocked_sender.send(2).await });
    settle().await;
    assert!(!blocked.is_finished());

    sender.detach().await;
    assert!(matches!(blocked.await.unwrap(), Err(ChannelError::Cancelled)));
    assert!(!sender.is_attached());
}

#[tokio::test]
async fn detach_cancels_blocked_get() {
    let channel = Channel::<i32>::new(1);
    let getter = channel.new_getter().await;

    let blocked_getter = getter.clone();
    let blocked = tokio::spawn(async move { blocked_getter.get().await });
    settle().await;
    assert!(!blocked.is_finished());

    getter.detach().await;
    let error = blocked.await.unwrap().unwrap_err();
    assert!(error.is_cancelled());
    assert!(!getter.is_attached());
}

#[tokio::test]
async fn silent_getter_attached_before_first_pull() {
    let channel = Channel::new(2);
    let getter = channel.new_silent_getter().await;
    assert!(getter.is_attached());

    let sender = channel.new_sender().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = seen.clone();
    getter.add_callback(Callback::immediate(move |value| {
        seen_by_callback.lock().unwrap().push(value);
    }));
    sender.send(5).await.unwrap();
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![5]);
}

#[tokio::test]
async fn silent_getter_consumes_without_get() {
    let channel = Channel::new(4);
    let sender = channel.new_sender().await;
    let getter = channel.new_silent_getter().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = seen.clone();
    getter.add_callback(Callback::immediate(move |value| {
        seen_by_callback.lock().unwrap().push(value);
    }));

    sender.send(1).await.unwrap();
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![1]);

    // while detached nothing reaches this getter. the dispatch loop still picks the value up
    // (the gate was left set by the silent loop's last get) and broadcasts it to nobody.
    getter.detach().await;
    sender.send(2).await.unwrap();
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![1]);

    getter.attach().await;
    sender.send(3).await.unwrap();
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
}

#[tokio::test]
async fn fault_stops_channel_and_detaches_parties() {
    let channel = Channel::new(4);
    let sender = channel.new_sender().await;
    let getter = channel.new_getter().await;

    let blocked_getter = getter.clone();
    let blocked = tokio::spawn(async move { blocked_getter.get().await });
    settle().await;
    assert!(!blocked.is_finished());

    channel.trip(anyhow::anyhow!("link exploded"));
    settle().await;

    let error = blocked.await.unwrap().unwrap_err();
    match &error {
        ChannelError::Closed { fault: Some(fault) } => {
            assert!(fault.to_string().contains("link exploded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!sender.is_attached());
    assert!(!getter.is_attached());
    assert!(matches!(
        sender.send(7).await,
        Err(ChannelError::Closed { fault: Some(_) }),
    ));
    assert!(getter.get().await.unwrap_err().is_closed());
}

#[tokio::test]
async fn close_unblocks_suspended_operations() {
    let channel = Channel::new(1);
    let sender = channel.new_sender().await;
    let getter = channel.new_getter().await;

    let blocked_getter = getter.clone();
    let blocked = tokio::spawn(async move { blocked_getter.get().await });
    settle().await;
    assert!(!blocked.is_finished());

    channel.close();
    settle().await;

    let error = blocked.await.unwrap().unwrap_err();
    assert!(matches!(error, ChannelError::Closed { fault: None }));
    assert!(!sender.is_attached());
    assert!(!getter.is_attached());
    assert!(matches!(
        sender.send(3).await,
        Err(ChannelError::Closed { fault: None }),
    ));
}

#[tokio::test]
async fn dropping_the_channel_stops_the_loop() {
    let channel = Channel::new(2);
    let sender = channel.new_sender().await;
    sender.send(1).await.unwrap();

    drop(channel);
    settle().await;

    assert!(!sender.is_attached());
    assert!(matches!(
        sender.send(2).await,
        Err(ChannelError::Closed { fault: None }),
    ));
}

#[tokio::test]
async fn clones_are_the_same_party() {
    let channel = Channel::new(1);
    let sender = channel.new_sender().await;
    let other = channel.new_sender().await;
    assert!(sender == sender.clone());
    assert!(sender != other);
    assert!(sender.clone().is_attached());

    sender.detach().await;
    assert!(!sender.is_attached());
    assert!(other.is_attached());

    sender.attach().await;
    assert!(sender.is_attached());

    // exercise Sender::send after a detach/attach cycle
    let getter = channel.new_getter().await;
    sender.send(9).await.unwrap();
    assert_eq!(getter.get().await.unwrap(), 9);
}
