// Signing & verification benchmarks for znode messages.
//
// Covers key generation, ping and announcement signing and verification,
// gossip hashing, and a full lifecycle sweep over registries of various sizes.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use znode_protocol::chain::{ChainHandle, MemoryChain, OutPoint};
use znode_protocol::clock::ManualClock;
use znode_protocol::config::{NetworkMode, NetworkParams, ZNODE_COLLATERAL};
use znode_protocol::crypto::ZnodeKeypair;
use znode_protocol::network::{RelayQueue, ZnodeList, ZnodeSync};
use znode_protocol::wallet::KeyringWallet;
use znode_protocol::znode::{AnnounceRequest, ZnodeBroadcast, ZnodeEnv, ZnodePing};

const T0: i64 = 1_700_000_000;

fn env_with_coins(coins: u32) -> (ZnodeEnv<MemoryChain>, KeyringWallet) {
    let mut chain = MemoryChain::with_blocks(300, T0 - 299 * 150, 150);
    let wallet = KeyringWallet::new();
    for i in 0..coins {
        let mut txid = [0u8; 32];
        txid[..4].copy_from_slice(&i.to_le_bytes());
        let outpoint = OutPoint::new(txid, 0);
        chain.add_coin(outpoint, ZNODE_COLLATERAL, 100);
        wallet.insert(outpoint, ZnodeKeypair::generate());
    }
    let env = ZnodeEnv::new(
        ChainHandle::new(chain),
        NetworkParams::for_mode(NetworkMode::Mainnet),
        Arc::new(ManualClock::new(T0)),
        Arc::new(ZnodeSync::synced()),
        Arc::new(RelayQueue::default()),
    );
    (env, wallet)
}

fn announce(
    env: &ZnodeEnv<MemoryChain>,
    wallet: &KeyringWallet,
    i: u32,
    key: &ZnodeKeypair,
) -> ZnodeBroadcast {
    let mut txid = [0u8; 32];
    txid[..4].copy_from_slice(&i.to_le_bytes());
    let tx = hex::encode(txid);
    ZnodeBroadcast::create(
        AnnounceRequest {
            service: format!("8.8.{}.{}:8168", i / 250 + 1, i % 250 + 1).parse().unwrap(),
            collateral_tx: &tx,
            collateral_index: 0,
            znode_key: key,
        },
        wallet,
        env,
        false,
    )
    .unwrap()
}

fn bench_keypair_generation(c: &mut Criterion) {
    c.bench_function("ed25519/keypair_generate", |b| {
        b.iter(ZnodeKeypair::generate);
    });
}

fn bench_ping(c: &mut Criterion) {
    let chain = MemoryChain::with_blocks(100, T0 - 99 * 150, 150);
    let clock = ManualClock::new(T0);
    let key = ZnodeKeypair::generate();
    let mut ping = ZnodePing::new(OutPoint::new([3; 32], 0), &chain, &clock).unwrap();

    c.bench_function("ping/sign", |b| {
        b.iter(|| ping.sign(&key, &clock).unwrap());
    });

    let public_key = key.public_key();
    c.bench_function("ping/verify", |b| {
        b.iter(|| ping.check_signature(&public_key).unwrap());
    });
    c.bench_function("ping/hash", |b| {
        b.iter(|| ping.hash());
    });
}

fn bench_broadcast(c: &mut Criterion) {
    let (env, wallet) = env_with_coins(1);
    let key = ZnodeKeypair::generate();
    let mnb = announce(&env, &wallet, 0, &key);

    c.bench_function("broadcast/create", |b| {
        b.iter(|| announce(&env, &wallet, 0, &key));
    });
    c.bench_function("broadcast/verify", |b| {
        b.iter(|| mnb.check_signature().unwrap());
    });
    c.bench_function("broadcast/simple_check", |b| {
        b.iter(|| mnb.clone().simple_check(&env).unwrap());
    });
}

fn bench_check_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("list/check_all");

    for size in [10u32, 100, 1_000] {
        let (env, wallet) = env_with_coins(size);
        let list = ZnodeList::default();
        let key = ZnodeKeypair::generate();
        for i in 0..size {
            list.process_broadcast(announce(&env, &wallet, i, &key), &env, None)
                .unwrap();
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &list, |b, list| {
            b.iter(|| {
                for znode in list.infos() {
                    if let Some(z) = list.get(&znode.identity.outpoint) {
                        z.check(&env, list.scope(None, T0), true);
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_keypair_generation,
    bench_ping,
    bench_broadcast,
    bench_check_all,
);
criterion_main!(benches);
