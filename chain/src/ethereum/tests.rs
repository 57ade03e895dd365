use super::*;
use interlab_common::docker::{DockerError, ExecOutput, JobSpec, MockRuntime};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

const FAUCET_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
const ALICE_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

/// Handler that answers `cast` invocations the way a live anvil node would:
/// advancing block numbers, keystore creation, address lookups.
fn script_cast(mock: &MockRuntime) {
    let height = AtomicU64::new(0);
    mock.set_job_handler(move |spec: &JobSpec| {
        let cmd: Vec<&str> = spec.cmd.iter().map(String::as_str).collect();
        match cmd.as_slice() {
            ["cast", "block-number", ..] => Ok(ExecOutput {
                stdout: format!("{}\n", height.fetch_add(1, Ordering::SeqCst)),
                stderr: String::new(),
            }),
            ["cast", "wallet", "new", keystore_dir, ..] => Ok(ExecOutput {
                stdout: format!(
                    "Created new encrypted keystore file: {keystore_dir}/4f2a-1c\nAddress: {ALICE_ADDRESS}\n"
                ),
                stderr: String::new(),
            }),
            ["cast", "wallet", "address", ..] => Ok(ExecOutput {
                stdout: format!("{ALICE_ADDRESS}\n"),
                stderr: String::new(),
            }),
            ["cast", "send", ..] => Ok(ExecOutput::default()),
            other => Err(DockerError::JobFailed {
                command: other.join(" "),
                exit_code: 127,
                stderr: "unscripted command".to_string(),
            }),
        }
    });
}

async fn initialized_chain(mock: &Arc<MockRuntime>) -> EthereumChain {
    let mut chain = EthereumChain::new("ethereum_tests", anvil_chain_config("ethereum"));
    chain
        .initialize("ethereum_tests", mock.clone(), "net-1")
        .await
        .unwrap();
    chain
}

#[test]
fn start_command_includes_devnet_flags() {
    let chain = EthereumChain::new("t", anvil_chain_config("ethereum"));
    let (cmd, mounts) = chain.start_command().unwrap();
    assert_eq!(
        cmd,
        vec![
            "anvil",
            "--host",
            "0.0.0.0",
            "--block-time",
            "2",
            "--accounts",
            "10",
            "--balance",
            "10000000",
        ]
    );
    assert!(mounts.is_empty());
}

#[test]
fn load_state_override_adds_mount_and_flag() {
    let mut cfg = anvil_chain_config("ethereum");
    cfg.config_overrides.insert(
        crate::config::LOAD_STATE_OVERRIDE.to_string(),
        json!("state/devnet-state.json"),
    );
    let chain = EthereumChain::new("t", cfg);
    let (cmd, mounts) = chain.start_command().unwrap();

    let target = "/home/foundry/devnet-state.json";
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].target, target);
    assert!(mounts[0].source.ends_with("state/devnet-state.json"));
    assert_eq!(cmd[cmd.len() - 2], "--load-state");
    assert_eq!(cmd[cmd.len() - 1], target);
}

#[test]
fn container_name_is_deterministic_and_sanitized() {
    let chain = EthereumChain::new("Test/Foo Bar", anvil_chain_config("ethereum"));
    assert_eq!(chain.name(), "anvil-31337-Test-Foo-Bar");
    assert_eq!(chain.rpc_address(), "http://anvil-31337-Test-Foo-Bar:8545");
}

#[tokio::test]
async fn height_parses_trimmed_decimal() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|_spec| {
        Ok(ExecOutput {
            stdout: "42\n".to_string(),
            stderr: String::new(),
        })
    });
    let chain = initialized_chain(&mock).await;
    assert_eq!(chain.height().await.unwrap(), 42);
}

#[tokio::test]
async fn non_numeric_height_is_a_protocol_error() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|_spec| {
        Ok(ExecOutput {
            stdout: "not-a-number\n".to_string(),
            stderr: String::new(),
        })
    });
    let chain = initialized_chain(&mock).await;
    let err = chain.height().await.unwrap_err();
    assert!(
        matches!(err, ChainError::InvalidHeight { ref output, .. } if output == "not-a-number"),
        "expected a parse error, got {err}"
    );
}

#[tokio::test]
async fn empty_height_output_is_an_error_not_zero() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|_spec| Ok(ExecOutput::default()));
    let chain = initialized_chain(&mock).await;
    assert!(chain.height().await.is_err());
}

#[tokio::test]
async fn faucet_wallet_comes_from_genesis_without_touching_the_keystore() {
    let mock = Arc::new(MockRuntime::new());
    let chain = initialized_chain(&mock).await;

    let faucet = chain.build_wallet(FAUCET_KEY_NAME, None).await.unwrap();
    assert_eq!(faucet.address(), FAUCET_ADDRESS);
    assert!(chain.keystore.read().is_empty());
    assert_eq!(mock.jobs_run(), 0);
}

#[tokio::test]
async fn build_wallet_creates_a_fresh_distinct_key() {
    let mock = Arc::new(MockRuntime::new());
    script_cast(&mock);
    let chain = initialized_chain(&mock).await;

    let alice = chain.build_wallet("alice", None).await.unwrap();
    assert_eq!(alice.address(), ALICE_ADDRESS);
    assert_ne!(alice.address(), FAUCET_ADDRESS);

    let resolved = chain.get_address("alice").await.unwrap();
    assert_eq!(String::from_utf8_lossy(&resolved), ALICE_ADDRESS);
}

#[tokio::test]
async fn get_address_for_unknown_key_fails() {
    let mock = Arc::new(MockRuntime::new());
    script_cast(&mock);
    let chain = initialized_chain(&mock).await;
    let err = chain.get_address("bob").await.unwrap_err();
    assert!(matches!(err, ChainError::UnknownKey(ref k) if k == "bob"));
}

#[tokio::test]
async fn faucet_send_funds_signs_with_the_genesis_key() {
    let mock = Arc::new(MockRuntime::new());
    let chain = initialized_chain(&mock).await;
    mock.set_job_handler(|spec: &JobSpec| {
        assert_eq!(spec.cmd[0], "cast");
        assert_eq!(spec.cmd[1], "send");
        assert!(spec.cmd.contains(&"--private-key".to_string()));
        Ok(ExecOutput::default())
    });

    chain
        .send_funds(
            FAUCET_KEY_NAME,
            &WalletAmount {
                address: ALICE_ADDRESS.to_string(),
                denom: "wei".to_string(),
                amount: ether(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(mock.jobs_run(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_blocks_until_ready_and_publishes_host_rpc() {
    let mock = Arc::new(MockRuntime::new());
    script_cast(&mock);
    let mut chain = EthereumChain::new("ethereum_tests", anvil_chain_config("ethereum"));
    chain
        .initialize("ethereum_tests", mock.clone(), "net-1")
        .await
        .unwrap();
    assert!(chain.host_rpc_address().is_none());

    chain.start(&[]).await.unwrap();

    let host_rpc = chain.host_rpc_address().expect("host rpc set after start");
    assert!(host_rpc.starts_with("http://localhost:"));
    assert_eq!(mock.start_calls(), 1);
    // Readiness polled at least blocks_to_wait + 1 height samples.
    assert!(mock.jobs_run() >= 3);
}

#[tokio::test]
async fn start_before_initialize_is_a_programming_error() {
    let mut chain = EthereumChain::new("ethereum_tests", anvil_chain_config("ethereum"));
    let err = chain.start(&[]).await.unwrap_err();
    assert!(matches!(err, ChainError::NotInitialized(_)));
}

#[tokio::test]
async fn initialize_tolerates_pull_failures() {
    let mock = Arc::new(MockRuntime::new());
    mock.fail_pulls();
    let mut chain = EthereumChain::new("ethereum_tests", anvil_chain_config("ethereum"));
    chain
        .initialize("ethereum_tests", mock.clone(), "net-1")
        .await
        .unwrap();
    assert_eq!(mock.live_volumes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_removes_container_and_volume() {
    let mock = Arc::new(MockRuntime::new());
    script_cast(&mock);
    let mut chain = EthereumChain::new("ethereum_tests", anvil_chain_config("ethereum"));
    chain
        .initialize("ethereum_tests", mock.clone(), "net-1")
        .await
        .unwrap();
    chain.start(&[]).await.unwrap();

    chain.teardown().await;
    chain.teardown().await;
    assert_eq!(mock.live_containers(), 0);
    assert!(mock.live_volumes().is_empty());
}

#[tokio::test]
async fn unsupported_operations_fail_fast() {
    let chain = EthereumChain::new("ethereum_tests", anvil_chain_config("ethereum"));
    assert!(chain.grpc_address().unwrap_err().is_unsupported());
    assert!(chain
        .export_state(None)
        .await
        .unwrap_err()
        .is_unsupported());
    assert!(chain
        .build_relayer_wallet("relayer")
        .await
        .unwrap_err()
        .is_unsupported());
    let amount = WalletAmount {
        address: ALICE_ADDRESS.to_string(),
        denom: "wei".to_string(),
        amount: U256::from(1u64),
    };
    assert!(chain
        .send_ibc_transfer("channel-0", FAUCET_KEY_NAME, &amount)
        .await
        .unwrap_err()
        .is_unsupported());
}
