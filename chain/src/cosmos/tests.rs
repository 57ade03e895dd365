use super::*;
use interlab_common::docker::{ExecOutput, JobSpec, MockRuntime};
use serde_json::json;

fn canined_config() -> ChainConfig {
    cosmos_chain_config(
        "canined",
        "puppy-1",
        "canined",
        "jkl",
        "ujkl",
        DockerImage::new("biphan4/canine-evm", "0.0.0"),
    )
}

async fn initialized_chain(mock: &Arc<MockRuntime>) -> CosmosChain {
    let mut chain = CosmosChain::new("cosmos_tests", canined_config());
    chain
        .initialize("cosmos_tests", mock.clone(), "net-1")
        .await
        .unwrap();
    chain
}

fn status_json(height: &str) -> String {
    json!({
        "NodeInfo": { "network": "puppy-1" },
        "SyncInfo": {
            "latest_block_hash": "AA11",
            "latest_block_height": height,
            "catching_up": false,
        },
    })
    .to_string()
}

#[test]
fn genesis_commands_assemble_a_single_validator_chain() {
    let chain = CosmosChain::new("t", canined_config());
    let extra = WalletAmount {
        address: "jkl1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq".to_string(),
        denom: "ujkl".to_string(),
        amount: U256::from(777u64),
    };
    let commands = chain.genesis_commands(std::slice::from_ref(&extra));

    let verbs: Vec<&str> = commands.iter().map(|c| c[1].as_str()).collect();
    assert_eq!(
        verbs,
        vec![
            "init",
            "keys",
            "keys",
            "add-genesis-account",
            "add-genesis-account",
            "add-genesis-account",
            "gentx",
            "collect-gentxs",
        ]
    );
    // Every command drives the same binary and home directory.
    for cmd in &commands {
        assert_eq!(cmd[0], "canined");
        assert!(cmd.contains(&"--home".to_string()));
    }
    // The extra genesis account is granted verbatim.
    let extra_grant = &commands[5];
    assert_eq!(extra_grant[2], extra.address);
    assert_eq!(extra_grant[3], "777ujkl");
}

#[test]
fn start_command_binds_public_rpc_and_grpc() {
    let chain = CosmosChain::new("t", canined_config());
    let cmd = chain.start_command();
    assert_eq!(cmd[0], "canined");
    assert_eq!(cmd[1], "start");
    assert!(cmd.contains(&"tcp://0.0.0.0:26657".to_string()));
    assert!(cmd.contains(&"0.0.0.0:9090".to_string()));
    assert!(cmd.contains(&"--minimum-gas-prices".to_string()));
}

#[test]
fn status_height_parses_both_key_spellings() {
    assert_eq!(parse_status_height(&status_json("17")).unwrap(), 17);

    let lower = json!({
        "sync_info": { "latest_block_height": "99" },
    })
    .to_string();
    assert_eq!(parse_status_height(&lower).unwrap(), 99);
}

#[test]
fn non_numeric_status_height_is_an_error_not_zero() {
    let err = parse_status_height(&status_json("not-a-number")).unwrap_err();
    assert!(matches!(err, ChainError::InvalidHeight { .. }));

    let err = parse_status_height("plain text, not json").unwrap_err();
    assert!(matches!(err, ChainError::Protocol { .. }));
}

#[tokio::test]
async fn height_falls_back_to_stderr_output() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|_spec| {
        // Older SDKs print status to stderr.
        Ok(ExecOutput {
            stdout: String::new(),
            stderr: status_json("23"),
        })
    });
    let chain = initialized_chain(&mock).await;
    assert_eq!(chain.height().await.unwrap(), 23);
}

#[test]
fn balance_parse_reads_the_requested_denom() {
    let raw = json!({
        "balances": [
            { "denom": "stake", "amount": "1" },
            { "denom": "ujkl", "amount": "123456789" },
        ],
        "pagination": { "total": "2" },
    })
    .to_string();
    assert_eq!(parse_balance(&raw, "ujkl").unwrap(), U256::from(123_456_789u64));
    assert_eq!(parse_balance(&raw, "uatom").unwrap(), U256::zero());
    assert!(parse_balance("nope", "ujkl").is_err());
}

#[tokio::test]
async fn send_funds_requires_a_known_key() {
    let mock = Arc::new(MockRuntime::new());
    let chain = initialized_chain(&mock).await;
    let err = chain
        .send_funds(
            "ghost",
            &WalletAmount {
                address: "jkl1abc".to_string(),
                denom: "ujkl".to_string(),
                amount: U256::from(10u64),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::UnknownKey(_)));
    assert_eq!(mock.jobs_run(), 0);
}

#[tokio::test]
async fn send_funds_builds_a_bank_send_tx() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|spec: &JobSpec| {
        let cmd = &spec.cmd;
        if cmd[1] == "keys" {
            return Ok(ExecOutput {
                stdout: "jkl1senderaddress\n".to_string(),
                stderr: String::new(),
            });
        }
        assert_eq!(&cmd[1..4], ["tx", "bank", "send"]);
        assert_eq!(cmd[4], "faucet");
        assert_eq!(cmd[5], "jkl1destination");
        assert_eq!(cmd[6], "500000ujkl");
        assert!(cmd.contains(&"--yes".to_string()));
        assert!(cmd.contains(&"--keyring-backend".to_string()));
        Ok(ExecOutput::default())
    });
    let chain = initialized_chain(&mock).await;
    chain.register_key(FAUCET_KEY_NAME);

    chain
        .send_funds(
            FAUCET_KEY_NAME,
            &WalletAmount {
                address: "jkl1destination".to_string(),
                denom: "ujkl".to_string(),
                amount: U256::from(500_000u64),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn ibc_transfer_returns_the_tx_hash() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|spec: &JobSpec| {
        assert_eq!(&spec.cmd[1..4], ["tx", "ibc-transfer", "transfer"]);
        Ok(ExecOutput {
            stdout: json!({ "txhash": "CAFEBABE", "code": 0 }).to_string(),
            stderr: String::new(),
        })
    });
    let chain = initialized_chain(&mock).await;
    chain.register_key("relayer");

    let hash = chain
        .send_ibc_transfer(
            "channel-0",
            "relayer",
            &WalletAmount {
                address: "cosmos1destination".to_string(),
                denom: "ujkl".to_string(),
                amount: U256::from(42u64),
            },
        )
        .await
        .unwrap();
    assert_eq!(hash, "CAFEBABE");
}

#[tokio::test]
async fn build_wallet_reuses_the_genesis_faucet_key() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|spec: &JobSpec| {
        // Only `keys show --address` should run for an existing faucet.
        assert_eq!(spec.cmd[1], "keys");
        assert_eq!(spec.cmd[2], "show");
        Ok(ExecOutput {
            stdout: "jkl1faucetaddress\n".to_string(),
            stderr: String::new(),
        })
    });
    let chain = initialized_chain(&mock).await;
    chain.register_key(FAUCET_KEY_NAME);

    let wallet = chain.build_wallet(FAUCET_KEY_NAME, None).await.unwrap();
    assert_eq!(wallet.address(), "jkl1faucetaddress");
    assert_eq!(mock.jobs_run(), 1);
}

#[tokio::test]
async fn recover_key_pipes_the_mnemonic_through_the_shell() {
    let mock = Arc::new(MockRuntime::new());
    mock.set_job_handler(|spec: &JobSpec| {
        if spec.cmd[0] == "sh" {
            assert_eq!(spec.cmd[1], "-c");
            assert!(spec.cmd[2].contains("keys add alice --recover"));
            assert!(spec.cmd[2].contains("abandon ability able"));
            return Ok(ExecOutput::default());
        }
        Ok(ExecOutput {
            stdout: "jkl1aliceaddress\n".to_string(),
            stderr: String::new(),
        })
    });
    let chain = initialized_chain(&mock).await;

    let wallet = chain
        .build_wallet("alice", Some("abandon ability able"))
        .await
        .unwrap();
    assert_eq!(wallet.address(), "jkl1aliceaddress");
}

#[test]
fn grpc_address_is_supported_for_cosmos() {
    let chain = CosmosChain::new("t", canined_config());
    assert_eq!(chain.grpc_address().unwrap(), format!("{}:9090", chain.hostname()));
}
