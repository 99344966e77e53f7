mod common;

use std::time::Duration;

use anyhow::Error;
use common::{
    TestRouter,
    join_peer,
};
use futures_util::StreamExt;
use tokio::sync::mpsc::unbounded_channel;
use wamp_session::{
    core::{
        cancel::CallCancelMode,
        error::InteractionError,
        types::{
            List,
            Value,
        },
    },
    peer::{
        Invocation,
        ProcedureOptions,
        RpcCall,
        RpcYield,
    },
};

fn count_to(value: u64) -> RpcCall {
    RpcCall {
        arguments: List::from_iter([Value::Integer(value)]),
        ..Default::default()
    }
}

async fn count(invocation: Invocation) -> anyhow::Result<RpcYield> {
    let target = invocation
        .arguments
        .first()
        .and_then(Value::integer)
        .ok_or_else(|| Error::msg("expected an integer argument"))?;
    if let Some(progress) = invocation.progress() {
        for i in 0..target {
            progress.emit(RpcYield {
                arguments: List::from_iter([Value::Integer(i)]),
                ..Default::default()
            })?;
        }
    }
    Ok(RpcYield {
        arguments: List::from_iter([Value::Integer(target)]),
        ..Default::default()
    })
}

fn pass_details() -> ProcedureOptions {
    ProcedureOptions {
        pass_details: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn receives_progressive_results_in_order() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    callee
        .register_with_options("com.myapp.count", pass_details(), count)
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    let mut rpc = caller
        .call_with_progress("com.myapp.count", count_to(3))
        .await
        .unwrap();
    let mut results = Vec::new();
    while let Some(result) = rpc.next_result().await.unwrap() {
        results.push((result.arguments, result.progress));
    }
    assert!(rpc.done());
    pretty_assertions::assert_eq!(
        results,
        Vec::from_iter([
            (List::from_iter([Value::Integer(0)]), true),
            (List::from_iter([Value::Integer(1)]), true),
            (List::from_iter([Value::Integer(2)]), true),
            (List::from_iter([Value::Integer(3)]), false),
        ])
    );
}

#[tokio::test]
async fn plain_call_receives_only_final_result() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    callee
        .register_with_options("com.myapp.count", pass_details(), count)
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.count", count_to(3)).await,
        Ok(result) => {
            assert_eq!(result.arguments, List::from_iter([Value::Integer(3)]));
            assert!(!result.progress);
        }
    );
}

#[tokio::test]
async fn progressive_results_as_stream() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    callee
        .register_with_options("com.myapp.count", pass_details(), count)
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    let results = caller
        .call_with_progress("com.myapp.count", count_to(5))
        .await
        .unwrap()
        .into_stream()
        .collect::<Vec<_>>()
        .await;
    assert_eq!(results.len(), 6);
    assert_matches::assert_matches!(results.last(), Some(Ok(result)) => {
        assert_eq!(result.arguments, List::from_iter([Value::Integer(5)]));
    });
}

#[tokio::test]
async fn canceled_call_resolves_immediately_and_interrupts_callee() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    let (started_tx, mut started_rx) = unbounded_channel();
    let (finished_tx, mut finished_rx) = unbounded_channel::<()>();
    callee
        .register("com.myapp.wait", move |_: Invocation| {
            let started_tx = started_tx.clone();
            let finished_tx = finished_tx.clone();
            async move {
                started_tx.send(())?;
                tokio::time::sleep(Duration::from_secs(60)).await;
                finished_tx.send(())?;
                Ok::<_, Error>(RpcYield::default())
            }
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    let rpc = caller
        .call("com.myapp.wait", RpcCall::default())
        .await
        .unwrap();
    started_rx.recv().await.unwrap();

    assert_matches::assert_matches!(rpc.cancel().await, Ok(()));
    assert_matches::assert_matches!(rpc.result().await, Err(err) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<InteractionError>(),
            Some(InteractionError::Canceled)
        );
    });

    // The interrupted handler never finishes.
    assert_matches::assert_matches!(
        tokio::time::timeout(Duration::from_millis(200), finished_rx.recv()).await,
        Err(_)
    );

    // The session is unaffected by the dropped late response.
    callee
        .register("com.myapp.echo", |invocation: Invocation| async move {
            Ok::<_, Error>(RpcYield {
                arguments: invocation.arguments,
                ..Default::default()
            })
        })
        .await
        .unwrap();
    assert_matches::assert_matches!(
        caller.call_and_wait("com.myapp.echo", count_to(7)).await,
        Ok(result) => {
            assert_eq!(result.arguments, List::from_iter([Value::Integer(7)]));
        }
    );
}

#[tokio::test]
async fn skip_cancel_leaves_callee_running() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    let (started_tx, mut started_rx) = unbounded_channel();
    let (release_tx, release_rx) = unbounded_channel::<()>();
    let release_rx = std::sync::Arc::new(futures_util::lock::Mutex::new(release_rx));
    let (finished_tx, mut finished_rx) = unbounded_channel();
    callee
        .register("com.myapp.wait", move |_: Invocation| {
            let started_tx = started_tx.clone();
            let release_rx = release_rx.clone();
            let finished_tx = finished_tx.clone();
            async move {
                started_tx.send(())?;
                release_rx.lock().await.recv().await;
                finished_tx.send(())?;
                Ok::<_, Error>(RpcYield::default())
            }
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    let mut rpc = caller
        .call_with_progress("com.myapp.wait", RpcCall::default())
        .await
        .unwrap();
    started_rx.recv().await.unwrap();

    assert_matches::assert_matches!(rpc.cancel_with_mode(CallCancelMode::Skip).await, Ok(()));
    assert_matches::assert_matches!(rpc.next_result().await, Err(err) => {
        assert_matches::assert_matches!(
            err.downcast_ref::<InteractionError>(),
            Some(InteractionError::Canceled)
        );
    });

    release_tx.send(()).unwrap();
    assert_matches::assert_matches!(finished_rx.recv().await, Some(()));
}

#[tokio::test]
async fn cancel_after_result_does_nothing() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let callee = join_peer(&router, "callee").await.unwrap();
    callee
        .register_with_options("com.myapp.count", pass_details(), count)
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    let mut rpc = caller
        .call_with_progress("com.myapp.count", count_to(0))
        .await
        .unwrap();
    assert_matches::assert_matches!(rpc.next_result().await, Ok(Some(result)) => {
        assert!(!result.progress);
    });
    assert_matches::assert_matches!(rpc.cancel().await, Ok(()));
    assert_matches::assert_matches!(rpc.next_result().await, Ok(None));
}

#[tokio::test]
async fn callee_enforces_call_timeout() {
    test_utils::setup::setup_test_environment();

    let router = TestRouter::new();
    let mut config = wamp_session::peer::PeerConfig::default();
    config.name = "callee".to_owned();
    config.callee.enforce_timeouts = true;
    let callee = wamp_session::peer::new_web_socket_peer(config).unwrap();
    callee.direct_connect(router.connect().await).await.unwrap();
    callee.join_realm(common::REALM).await.unwrap();
    callee
        .register("com.myapp.wait", |_: Invocation| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Error>(RpcYield::default())
        })
        .await
        .unwrap();

    let caller = join_peer(&router, "caller").await.unwrap();
    assert_matches::assert_matches!(
        caller
            .call_and_wait(
                "com.myapp.wait",
                RpcCall {
                    timeout: Some(Duration::from_millis(100)),
                    ..Default::default()
                },
            )
            .await,
        Err(err) => {
            assert_matches::assert_matches!(
                err.downcast_ref::<InteractionError>(),
                Some(InteractionError::Canceled)
            );
        }
    );
}
