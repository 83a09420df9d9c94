//! E2E Test: Coinbase Protection
//!
//! With `-regtestprotectcoinbase`, coinbase outputs may only be spent into
//! a zaddr, in full, with no change. Covers:
//! - Transparent sends refused while only coinbase funds are available
//! - Watch-only UTXOs never selected for `z_sendmany`
//! - Shielding coinbase exactly, with params and txid in the debug log
//! - zaddr -> zaddr at zero fee and zaddr -> taddr unshielding
//! - Dust change, insufficient funds and fee range rejections
//! - Many-recipient and chained shielded sends keeping the Sprout pool exact

use {
    zqa_e2e_tests::helpers::*,
    zqa_harness::{BalanceQuery, SPROUT_POOL},
    zqa_rpc_client::{codes, NodeRpc},
    zqa_rpc_types::{Amount, Recipient, COIN, MAX_MONEY},
};

const FLAGS: &[&str] = &["-regtestprotectcoinbase", "-debug=zrpcunsafe"];

fn assert_pool_everywhere(cluster: &SimCluster, expected: Amount) {
    for index in 0..cluster.len() {
        if cluster.rpc(index).is_ok() {
            cluster.assert_pool_total(index, SPROUT_POOL, expected).unwrap();
        }
    }
}

fn total_balance(cluster: &SimCluster, index: usize, transparent: &str, private: &str, total: &str) {
    cluster
        .assert_balance(index, &BalanceQuery::Transparent, coins(transparent))
        .unwrap();
    cluster.assert_balance(index, &BalanceQuery::Private, coins(private)).unwrap();
    cluster.assert_balance(index, &BalanceQuery::Total, coins(total)).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: coinbase protection end to end
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_protect_coinbase() {
    init_logging();
    banner("PROTECT COINBASE: shield-only coinbase spending");

    let mut cluster = start_cluster(4, &[FLAGS, FLAGS, FLAGS, FLAGS]);
    cluster.connect_bi(0, 1).unwrap();
    cluster.connect_bi(1, 2).unwrap();
    cluster.connect_bi(0, 2).unwrap();
    cluster.connect_bi(0, 3).unwrap();
    cluster.sync_all().unwrap();

    generate(&cluster, 0, 4);
    let info = cluster.rpc(0).unwrap().getwalletinfo().unwrap();
    assert_eq!(info.immature_balance, rewards(4));
    assert_eq!(info.balance, Amount::ZERO);
    cluster.sync_all().unwrap();
    mine_and_sync(&cluster, 1, 101);

    for (index, expected) in [(0, rewards(4)), (1, rewards(1)), (2, Amount::ZERO), (3, Amount::ZERO)] {
        cluster.assert_balance(index, &BalanceQuery::Wallet, expected).unwrap();
    }
    assert_pool_everywhere(&cluster, Amount::ZERO);
    println!("✓ 200 mature coinbase on node0, empty pool");

    // Transparent sends of coinbase are refused outright.
    let to = cluster.rpc(2).unwrap().getnewaddress().unwrap();
    let err = provider_error(cluster.rpc(0).unwrap().sendtoaddress(&to, coins("1"), false));
    assert_eq!(err.code, codes::RPC_WALLET_ERROR);
    assert!(err.contains("Coinbase funds can only be sent to a zaddr"), "{err}");
    println!("✓ coinbase -> taddr refused");

    // The first new address is the one the coinbase outputs paid.
    let mytaddr = cluster.rpc(0).unwrap().getnewaddress().unwrap();
    let myzaddr = cluster.rpc(0).unwrap().z_getnewaddress().unwrap();

    // Watch-only UTXOs are never selected.
    cluster.rpc(3).unwrap().importaddress(&mytaddr, true).unwrap();
    let opid = cluster
        .rpc(3)
        .unwrap()
        .z_sendmany(&mytaddr, &[Recipient::new(&myzaddr, coins("1"))], None, None)
        .unwrap();
    cluster
        .await_failure(3, &opid, "no UTXOs found for taddr from address")
        .unwrap();
    cluster.stop_node(3).unwrap();
    println!("✓ watch-only UTXOs not spendable");

    // Spending one coinbase output would leave change.
    let opid = cluster
        .rpc(0)
        .unwrap()
        .z_sendmany(&mytaddr, &[Recipient::new(&myzaddr, coins("1.23456789"))], None, None)
        .unwrap();
    let status = cluster.rpc(0).unwrap().z_getoperationstatus(&[opid.clone()]).unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].method.as_deref(), Some("z_sendmany"));
    let params = status[0].params.clone().unwrap();
    assert_eq!(Amount::from_json(&params["fee"]).unwrap(), DEFAULT_FEE);
    assert_eq!(params["minconf"].as_u64(), Some(1));
    assert_eq!(params["fromaddress"].as_str(), Some(mytaddr.as_str()));
    assert_eq!(params["amounts"][0]["address"].as_str(), Some(myzaddr.as_str()));
    assert_eq!(
        Amount::from_json(&params["amounts"][0]["amount"]).unwrap(),
        coins("1.23456789")
    );
    cluster
        .await_failure(0, &opid, "wallet does not allow any change")
        .unwrap();
    println!("✓ change from coinbase refused; status echoes params");

    // Two coinbase outputs, 100 less the default fee, shield exactly.
    let mut sprout = coins("99.9999");
    let opid = cluster
        .rpc(0)
        .unwrap()
        .z_sendmany(&mytaddr, &[Recipient::new(&myzaddr, sprout)], None, None)
        .unwrap();
    let txid = cluster.await_txid(0, &opid).unwrap();
    cluster.sync_all().unwrap();
    mine_and_sync(&cluster, 1, 1);

    let log = debug_log(&cluster, 0);
    let initialized = log
        .lines()
        .position(|line| {
            line.contains(&format!("{opid}: z_sendmany initialized"))
                && line.contains(&mytaddr)
                && line.contains(&myzaddr)
        })
        .expect("initialized line with params");
    let finished = log
        .lines()
        .position(|line| line.contains(&format!("{opid}: z_sendmany finished")) && line.contains(txid.as_str()))
        .expect("finished line with txid");
    assert!(initialized < finished);

    total_balance(&cluster, 0, "100", "99.9999", "199.9999");
    cluster.verifier_mut().record_pool_delta(SPROUT_POOL, sprout).unwrap();
    assert_pool_everywhere(&cluster, sprout);
    println!("✓ shielded 99.9999; debug log has params then txid");

    // zaddr -> zaddr with a zero fee leaves the pool alone.
    let opid = cluster
        .rpc(0)
        .unwrap()
        .z_sendmany(&myzaddr, &[Recipient::new(&myzaddr, sprout)], Some(1), Some(Amount::ZERO))
        .unwrap();
    cluster.await_success(0, &opid).unwrap();
    cluster.sync_all().unwrap();
    mine_and_sync(&cluster, 1, 1);
    total_balance(&cluster, 0, "100", "99.9999", "199.9999");
    assert_pool_everywhere(&cluster, sprout);
    println!("✓ zero-fee z -> z keeps the pool at 99.9999");

    // Unshield 50 back to the taddr.
    let unshield = coins("50");
    let opid = cluster
        .rpc(0)
        .unwrap()
        .z_sendmany(&myzaddr, &[Recipient::new(&mytaddr, unshield)], None, None)
        .unwrap();
    let txid = cluster.await_txid(0, &opid).unwrap();
    cluster.sync_all().unwrap();
    assert!(cluster.rpc(0).unwrap().getrawmempool().unwrap().contains(&txid));
    mine_and_sync(&cluster, 1, 1);

    let delta = unshield.checked_add(DEFAULT_FEE).unwrap();
    sprout = sprout.checked_sub(delta).unwrap();
    cluster
        .verifier_mut()
        .record_pool_delta(SPROUT_POOL, delta.checked_neg().unwrap())
        .unwrap();
    total_balance(&cluster, 0, "150", "49.9998", "199.9998");
    assert_pool_everywhere(&cluster, sprout);
    println!("✓ unshielded 50, pool at 49.9998");

    // Change one zatoshi under the dust threshold.
    let dusty = coins("50").checked_sub(DEFAULT_FEE).unwrap().checked_sub(Amount::from_zat(1)).unwrap();
    let to = cluster.rpc(0).unwrap().getnewaddress().unwrap();
    let opid = cluster
        .rpc(0)
        .unwrap()
        .z_sendmany(&mytaddr, &[Recipient::new(&to, dusty)], None, None)
        .unwrap();
    cluster
        .await_failure(
            0,
            &opid,
            "Insufficient transparent funds, have 50.00, need 0.00000545 more to avoid creating invalid change output 0.00000001 (dust threshold is 0.00000546)",
        )
        .unwrap();
    println!("✓ dust change refused");

    // Insufficient funds, synchronous and asynchronous.
    let to = cluster.rpc(2).unwrap().getnewaddress().unwrap();
    let err = provider_error(cluster.rpc(0).unwrap().sendtoaddress(&to, coins("99999"), false));
    assert_eq!(err.code, codes::RPC_WALLET_INSUFFICIENT_FUNDS);
    assert!(err.contains("Insufficient funds"));

    let far = [Recipient::new(cluster.rpc(1).unwrap().getnewaddress().unwrap(), coins("10000"))];
    let opid = cluster.rpc(0).unwrap().z_sendmany(&mytaddr, &far, None, None).unwrap();
    cluster
        .await_failure(0, &opid, "Insufficient transparent funds, have 50.00, need 10000.0001")
        .unwrap();
    let opid = cluster.rpc(0).unwrap().z_sendmany(&myzaddr, &far, None, None).unwrap();
    cluster
        .await_failure(0, &opid, "Insufficient protected funds, have 49.9998, need 10000.0001")
        .unwrap();

    let err = provider_error(cluster.rpc(0).unwrap().sendtoaddress(&to, coins("51"), false));
    assert!(
        err.contains("Insufficient funds, coinbase funds can only be spent after they have been sent to a zaddr"),
        "{err}"
    );
    println!("✓ insufficient funds reported for every path");

    // Many dust-threshold recipients from one note.
    let per_recipient = coins("0.00000546");
    let recipients: Vec<Recipient> = (0..25)
        .map(|_| Recipient::new(cluster.rpc(2).unwrap().getnewaddress().unwrap(), per_recipient))
        .collect();
    let opid = cluster.rpc(0).unwrap().z_sendmany(&myzaddr, &recipients, None, None).unwrap();
    cluster.await_success(0, &opid).unwrap();
    cluster.sync_all().unwrap();
    mine_and_sync(&cluster, 1, 1);

    let mut node2_balance = per_recipient.checked_mul(25).unwrap();
    let delta = node2_balance.checked_add(DEFAULT_FEE).unwrap();
    sprout = sprout.checked_sub(delta).unwrap();
    cluster
        .verifier_mut()
        .record_pool_delta(SPROUT_POOL, delta.checked_neg().unwrap())
        .unwrap();
    cluster.assert_balance(2, &BalanceQuery::Wallet, node2_balance).unwrap();
    assert_pool_everywhere(&cluster, sprout);
    println!("✓ 25 dust-threshold outputs delivered");

    // Fee validation happens before an operation is queued.
    let node0 = cluster.rpc(0).unwrap();
    let negative = provider_error(node0.z_sendmany(&myzaddr, &recipients, Some(1), Some(Amount::from_zat(-COIN))));
    assert!(negative.contains("Amount out of range"));
    let too_big = provider_error(node0.z_sendmany(
        &myzaddr,
        &recipients,
        Some(1),
        Some(Amount::from_zat(MAX_MONEY).checked_add(Amount::from_zat(1)).unwrap()),
    ));
    assert!(too_big.contains("Amount out of range"));
    let over_sum = provider_error(node0.z_sendmany(
        &myzaddr,
        &recipients,
        Some(1),
        Some(node2_balance.checked_add(Amount::from_zat(1)).unwrap()),
    ));
    assert!(over_sum.contains("is greater than the sum of outputs"));
    println!("✓ negative, oversized and over-sum fees refused");

    // Non-coinbase funds can still go to a taddr.
    let to = cluster.rpc(2).unwrap().getnewaddress().unwrap();
    cluster.rpc(0).unwrap().sendtoaddress(&to, coins("9"), false).unwrap();
    cluster.sync_all().unwrap();
    mine_and_sync(&cluster, 1, 1);
    node2_balance = node2_balance.checked_add(coins("9")).unwrap();
    cluster.assert_balance(2, &BalanceQuery::Wallet, node2_balance).unwrap();
    println!("✓ 9 sent from the unshielded note");

    // Several shielded recipients with a custom fee.
    let custom_fee = coins("0.00012345");
    let per_zaddr = coins("0.002");
    let zbalance = cluster.balance(0, &BalanceQuery::address(&myzaddr)).unwrap();
    let recipients: Vec<Recipient> = (0..3)
        .map(|_| Recipient::new(cluster.rpc(2).unwrap().z_getnewaddress().unwrap(), per_zaddr))
        .collect();
    let opid = cluster
        .rpc(0)
        .unwrap()
        .z_sendmany(&myzaddr, &recipients, Some(1), Some(custom_fee))
        .unwrap();
    cluster.await_success(0, &opid).unwrap();
    cluster.sync_all().unwrap();
    mine_and_sync(&cluster, 1, 1);

    let sent = per_zaddr.checked_mul(3).unwrap();
    cluster.assert_balance(2, &BalanceQuery::Private, sent).unwrap();
    cluster
        .assert_balance(
            0,
            &BalanceQuery::address(&myzaddr),
            zbalance.checked_sub(custom_fee).unwrap().checked_sub(sent).unwrap(),
        )
        .unwrap();
    sprout = sprout.checked_sub(custom_fee).unwrap();
    cluster
        .verifier_mut()
        .record_pool_delta(SPROUT_POOL, custom_fee.checked_neg().unwrap())
        .unwrap();
    assert_pool_everywhere(&cluster, sprout);
    cluster
        .verifier()
        .assert_model_pool(cluster.node(0).unwrap(), SPROUT_POOL)
        .unwrap();
    println!("✓ three zaddr recipients, pool down by the fee only");

    println!("PROTECT COINBASE TEST PASSED ✓\n");
}
