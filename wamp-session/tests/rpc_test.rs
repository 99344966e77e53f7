mod common;

use std::sync::{
    Arc,
    atomic::{
        AtomicUsize,
        Ordering,
    },
};

use anyhow::{
    Error,
    Result,
};
use common::{
    TestRouter,
    join_peer,
};
use futures_util::future::join_all;
use wamp_session::{
    core::{
        error::{
            ApplicationError,
            InteractionError,
        },
        types::{
            List,
            Value,
        },
        uri::Uri,
    },
    peer::{
        Invocation,
        PublishedEvent,
        RpcCall,
        RpcResult,
        RpcYield,
        WebSocketPeer,
    },
};

fn square(invocation: Invocation) -> Result<RpcYield> {
    let value = invocation
        .arguments
        .first()
        .and_then(Value::signed_integer)
        .ok_or_else(|| Error::msg("expected an integer argument"))?;
    if value <= 0 {
        return Err(ApplicationError::new(
            Uri::try_from("com.myapp.error.nonpositive")?,
            "value must be positive",
        )
        .with_arguments(List::from_iter([Value::from(value)]))
        .into());
    }
    Ok(RpcYield {
        arguments: List::from_iter([Value::from(value * value)]),
        ..Default::default()
    })
}

fn square_call(value: i64) -> RpcCall {
    RpcCall {
        arguments: List::from_iter([Value::from(value)]),
        ..Default::default()
    }
}

#[tokio::test]
async fn calls_procedure_registered_by_another_peer() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    let invocations = Arc::new(AtomicUsize::new(0));
    callee
        .register("com.myapp.square", {
            let invocations = invocations.clone();
            move |invocation: Invocation| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async move { square(invocation) }
            }
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.square", square_call(2)).await,
        Ok(result) => {
            pretty_assertions::assert_eq!(result, RpcResult {
                arguments: List::from_iter([Value::Integer(4)]),
                ..Default::default()
            });
        }
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_error_reaches_caller_as_application_error() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    callee
        .register("com.myapp.square", |invocation: Invocation| async move {
            square(invocation)
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.square", square_call(-2)).await,
        Err(err) => {
            assert_matches::assert_matches!(err.downcast_ref::<ApplicationError>(), Some(err) => {
                assert_eq!(err.reason.as_ref(), "com.myapp.error.nonpositive");
                assert_eq!(err.arguments, List::from_iter([Value::SignedInteger(-2)]));
            });
        }
    );
}

#[tokio::test]
async fn callee_publishes_while_handling_call() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let publisher = Arc::new(join_peer(&router, "publisher").await.unwrap());
    let callee = join_peer(&router, "callee").await.unwrap();
    callee
        .register("com.myapp.square", {
            let publisher = publisher.clone();
            move |invocation: Invocation| {
                let publisher = publisher.clone();
                async move {
                    let result = square(invocation.clone());
                    if result.is_err() {
                        publisher
                            .publish(
                                "com.myapp.square_on_nonpositive",
                                PublishedEvent {
                                    arguments: invocation.arguments,
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                    result
                }
            }
        })
        .await
        .unwrap();

    let subscriber = join_peer(&router, "subscriber").await.unwrap();
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    subscriber
        .subscribe("com.myapp.square_on_nonpositive", move |event: wamp_session::peer::Event| {
            let event_tx = event_tx.clone();
            async move {
                event_tx.send(event.arguments)?;
                Ok::<_, Error>(())
            }
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.square", square_call(-2)).await,
        Err(err) => {
            assert!(err.is::<ApplicationError>());
        }
    );
    assert_matches::assert_matches!(event_rx.recv().await, Some(arguments) => {
        assert_eq!(arguments, List::from_iter([Value::SignedInteger(-2)]));
    });
}

#[tokio::test]
async fn concurrent_calls_resolve_independently() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    callee
        .register("com.myapp.square", |invocation: Invocation| async move {
            square(invocation)
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    async fn call(caller: &WebSocketPeer, value: i64) -> Result<RpcResult> {
        caller.call_and_wait("com.myapp.square", square_call(value)).await
    }
    let results = join_all((1..=20).map(|value| call(&caller, value))).await;
    for (value, result) in (1..=20i64).zip(results) {
        assert_matches::assert_matches!(result, Ok(result) => {
            assert_eq!(result.arguments, List::from_iter([Value::from(value * value)]));
        });
    }
}

#[tokio::test]
async fn call_to_missing_procedure_fails() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let caller = join_peer(&router, "caller").await.unwrap();
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.square", square_call(2)).await,
        Err(err) => {
            assert_matches::assert_matches!(
                err.downcast_ref::<InteractionError>(),
                Some(InteractionError::NoSuchProcedure)
            );
        }
    );
}

#[tokio::test]
async fn duplicate_registration_fails() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let first = join_peer(&router, "first").await.unwrap();
    let second = join_peer(&router, "second").await.unwrap();
    let handler = |invocation: Invocation| async move { square(invocation) };

    first.register("com.myapp.square", handler).await.unwrap();
    assert_matches::assert_matches!(first.register("com.myapp.square", handler).await, Err(err) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<InteractionError>(),
            Some(InteractionError::ProcedureAlreadyExists)
        );
    });
    assert_matches::assert_matches!(second.register("com.myapp.square", handler).await, Err(err) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<InteractionError>(),
            Some(InteractionError::ProcedureAlreadyExists)
        );
    });
}

#[tokio::test]
async fn unregistered_procedure_is_no_longer_invoked() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    let procedure = callee
        .register("com.myapp.square", |invocation: Invocation| async move {
            square(invocation)
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.square", square_call(3)).await,
        Ok(_)
    );

    assert_matches::assert_matches!(callee.unregister(&procedure).await, Ok(()));
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.square", square_call(3)).await,
        Err(err) => {
            assert_matches::assert_matches!(
                err.downcast_ref::<InteractionError>(),
                Some(InteractionError::NoSuchProcedure)
            );
        }
    );

    // The procedure can be registered again once released.
    assert_matches::assert_matches!(
        callee
            .register("com.myapp.square", |invocation: Invocation| async move {
                square(invocation)
            })
            .await,
        Ok(_)
    );
    assert_matches::assert_matches!(callee.unregister(&procedure).await, Err(err) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<InteractionError>(),
            Some(InteractionError::NoSuchRegistration)
        );
    });
}
