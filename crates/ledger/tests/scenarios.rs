//! End-to-end ledger scenarios: every transaction type through
//! propose → validate → commit.

mod common;

use common::{min_fee, send, signed, TestChain};
use num_bigint::BigInt;
use scpt_common::{tokens, Address, BlsKeypair, Coins, Keypair};
use scpt_ledger::execution::stake_return_height;
use scpt_ledger::vm::{contract_address, KvVm};
use scpt_ledger::{
    DepositStakeTx, ErrorCode, HolderSignature, LedgerError, ReleaseFundTx, ReserveFundTx,
    SmartContractTx, Split, SplitRuleTx, StakePurpose, StakeRewardDistributionTx, Tx, TxInput,
    TxOutput, WithdrawStakeTx,
};

fn wei(n: u128) -> BigInt {
    BigInt::from(n)
}

// ════════════════════════════════════════════════════════════════════════════
// SEND
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn send_to_new_account() {
    let a = Keypair::from_seed(1);
    let b = Address::from_bytes([0xbb; 20]);
    let mut chain = TestChain::new(vec![(a.address(), Coins::spay(wei(1_000_000_000_000_000_000)))], vec![]);

    let block = chain.produce_all(vec![send(&a, 1, b, Coins::spay(wei(500_000_000_000_000_000)))]);
    assert_eq!(block.height(), 1);

    assert_eq!(chain.sequence(&a.address()), 1);
    assert_eq!(
        chain.balance(&a.address()).spay,
        wei(1_000_000_000_000_000_000 - 500_000_000_000_000_000 - 1_000_000_000_000)
    );
    assert_eq!(chain.balance(&b).spay, wei(500_000_000_000_000_000));
    assert_eq!(chain.sequence(&b), 0);
}

#[test]
fn sequence_must_be_exactly_next() {
    let a = Keypair::from_seed(1);
    let b = Address::from_bytes([0xbb; 20]);
    let mut chain = TestChain::new(vec![(a.address(), Coins::spay(tokens(10)))], vec![]);

    for seq in [0u64, 2, 7] {
        let err = chain
            .ledger
            .check_tx(&send(&a, seq, b, Coins::spay(1u64)))
            .unwrap_err();
        assert!(
            matches!(err.code(), ErrorCode::InvalidSequence | ErrorCode::MalformedTx),
            "seq {} gave {:?}",
            seq,
            err
        );
    }

    chain.produce_all(vec![send(&a, 1, b, Coins::spay(1u64)), send(&a, 2, b, Coins::spay(1u64))]);
    assert_eq!(chain.sequence(&a.address()), 2);

    // replaying an applied transaction fails on its sequence
    let replay = send(&a, 2, b, Coins::spay(1u64));
    let err = chain.ledger.check_tx(&replay).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSequence);
    assert!(!err.is_retryable());
}

#[test]
fn insufficient_fund_and_low_fee_are_distinguished() {
    let a = Keypair::from_seed(1);
    let b = Address::from_bytes([0xbb; 20]);
    let chain = TestChain::new(vec![(a.address(), Coins::spay(tokens(1)))], vec![]);

    let too_much = send(&a, 1, b, Coins::spay(tokens(2)));
    let err = chain.ledger.check_tx(&too_much).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientFund);
    assert!(!err.is_retryable());

    let cheap = signed(
        Tx::Send(scpt_ledger::SendTx {
            fee: Coins::spay(1u64),
            inputs: vec![TxInput::new(a.address(), Coins::spay(2u64), 1)],
            outputs: vec![TxOutput::new(b, Coins::spay(1u64))],
        }),
        &[&a],
    );
    let err = chain.ledger.check_tx(&cheap).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidFee);
    assert!(err.is_retryable());
}

#[test]
fn wide_transfer_must_pay_per_account() {
    let a = Keypair::from_seed(1);
    let chain = TestChain::new(vec![(a.address(), Coins::spay(tokens(10)))], vec![]);
    let outputs: Vec<TxOutput> = (0..511u32)
        .map(|i| {
            let mut raw = [0x40u8; 20];
            raw[..4].copy_from_slice(&i.to_be_bytes());
            TxOutput::new(Address::from_bytes(raw), Coins::spay(1u64))
        })
        .collect();
    let wide = |fee: Coins| {
        let total = Coins::spay(511u64).plus(&fee);
        signed(
            Tx::Send(scpt_ledger::SendTx {
                fee,
                inputs: vec![TxInput::new(a.address(), total, 1)],
                outputs: outputs.clone(),
            }),
            &[&a],
        )
    };

    // the flat minimum fee spread over 512 accounts is far below the gas price floor
    let err = chain.ledger.check_tx(&wide(min_fee())).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidGasPrice);
    assert!(err.is_retryable());

    // 256 times the flat fee covers 512 accounts at the floor
    let fair = Coins::spay(wei(256 * 1_000_000_000_000));
    chain.ledger.check_tx(&wide(fair)).unwrap();
}

#[test]
fn unbalanced_send_rejected() {
    let a = Keypair::from_seed(1);
    let b = Address::from_bytes([0xbb; 20]);
    let chain = TestChain::new(vec![(a.address(), Coins::spay(tokens(10)))], vec![]);
    let tx = signed(
        Tx::Send(scpt_ledger::SendTx {
            fee: min_fee(),
            inputs: vec![TxInput::new(a.address(), Coins::spay(tokens(2)), 1)],
            outputs: vec![TxOutput::new(b, Coins::spay(tokens(1)))],
        }),
        &[&a],
    );
    assert_eq!(chain.ledger.check_tx(&tx).unwrap_err().code(), ErrorCode::Unbalanced);
}

#[test]
fn tampered_signature_rejected() {
    let a = Keypair::from_seed(1);
    let b = Address::from_bytes([0xbb; 20]);
    let chain = TestChain::new(vec![(a.address(), Coins::spay(tokens(10)))], vec![]);
    let mut tx = send(&a, 1, b, Coins::spay(tokens(1)));
    if let Tx::Send(s) = &mut tx {
        s.outputs[0].coins = Coins::spay(tokens(2));
        s.inputs[0].coins = Coins::spay(tokens(2)).plus(&min_fee());
    }
    assert_eq!(
        chain.ledger.check_tx(&tx).unwrap_err().code(),
        ErrorCode::InvalidSignature
    );
}

#[test]
fn edge_stake_moves_balances_like_send() {
    let a = Keypair::from_seed(1);
    let b = Address::from_bytes([0xbb; 20]);
    let mut chain = TestChain::new(vec![(a.address(), Coins::new(tokens(5), tokens(5)))], vec![]);
    let amount = Coins::scpt(tokens(1));
    let tx = signed(
        Tx::EdgeStake(scpt_ledger::SendTx {
            fee: min_fee(),
            inputs: vec![TxInput::new(a.address(), amount.plus(&min_fee()), 1)],
            outputs: vec![TxOutput::new(b, amount.clone())],
        }),
        &[&a],
    );
    chain.produce_all(vec![tx]);
    assert_eq!(chain.balance(&b), amount);
}

// ════════════════════════════════════════════════════════════════════════════
// RESERVED FUNDS
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn reserve_then_release_after_freeze() {
    let a = Keypair::from_seed(1);
    let initial = Coins::spay(tokens(10));
    let mut chain = TestChain::new(vec![(a.address(), initial.clone())], vec![]);

    let reserve = signed(
        Tx::ReserveFund(ReserveFundTx {
            fee: min_fee(),
            source: TxInput::new(a.address(), Coins::spay(900u64), 1),
            collateral: Coins::spay(1203u64),
            resource_ids: vec!["rid-1".into()],
            duration: 1002,
        }),
        &[&a],
    );
    let block = chain.produce_all(vec![reserve]);
    let h = block.height();
    let account = chain.ledger.account(&a.address()).unwrap().unwrap();
    assert_eq!(account.reserved_funds.len(), 1);
    assert_eq!(account.reserved_funds[0].end_block_height, h + 1002);
    assert_eq!(
        account.balance,
        initial.minus(&min_fee()).minus(&Coins::spay(2103u64))
    );

    let release = signed(
        Tx::ReleaseFund(ReleaseFundTx {
            fee: min_fee(),
            source: TxInput::new(a.address(), Coins::zero(), 2),
            reserve_sequence: 1,
        }),
        &[&a],
    );

    // next block would be h + 1002 + 5 - 1: still frozen
    chain.advance_to(h + 1002 + 5 - 2);
    let err = chain.ledger.check_tx(&release).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReleaseFundCheckFailed);
    let skipped = chain.produce(vec![release.clone()]);
    assert_eq!(skipped.skipped, 1);

    // next block is h + 1002 + 5
    assert!(chain.ledger.check_tx(&release).is_ok());
    chain.produce_all(vec![release]);
    let account = chain.ledger.account(&a.address()).unwrap().unwrap();
    assert!(account.reserved_funds.is_empty());
    assert_eq!(account.balance, initial.minus(&min_fee()).minus(&min_fee()));
}

#[test]
fn reserve_rejects_bad_duration_and_collateral() {
    let a = Keypair::from_seed(1);
    let chain = TestChain::new(vec![(a.address(), Coins::spay(tokens(10)))], vec![]);
    let reserve = |duration, collateral: u64| {
        signed(
            Tx::ReserveFund(ReserveFundTx {
                fee: min_fee(),
                source: TxInput::new(a.address(), Coins::spay(900u64), 1),
                collateral: Coins::spay(collateral),
                resource_ids: vec!["rid".into()],
                duration,
            }),
            &[&a],
        )
    };
    for tx in [reserve(10, 1203), reserve(50_000, 1203), reserve(1002, 900)] {
        assert_eq!(
            chain.ledger.check_tx(&tx).unwrap_err().code(),
            ErrorCode::ReserveFundCheckFailed
        );
    }
}

#[test]
fn split_rule_belongs_to_initiator_until_expiry() {
    let a = Keypair::from_seed(1);
    let b = Keypair::from_seed(2);
    let mut chain = TestChain::new(
        vec![
            (a.address(), Coins::spay(tokens(10))),
            (b.address(), Coins::spay(tokens(10))),
        ],
        vec![],
    );
    let rule = |k: &Keypair, seq, pct| {
        signed(
            Tx::SplitRule(SplitRuleTx {
                fee: min_fee(),
                resource_id: "video-1".into(),
                initiator: TxInput::new(k.address(), Coins::zero(), seq),
                splits: vec![Split {
                    address: Address::from_bytes([0x77; 20]),
                    percentage: pct,
                }],
                duration: 10,
            }),
            &[k],
        )
    };

    chain.produce_all(vec![rule(&a, 1, 30)]);
    chain.produce_all(vec![rule(&a, 2, 40)]);
    let stored = chain.ledger.split_rule("video-1").unwrap().unwrap();
    assert_eq!(stored.splits[0].percentage, 40);
    assert_eq!(stored.initiator, a.address());

    let err = chain.ledger.check_tx(&rule(&b, 1, 10)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SplitRuleCheckFailed);

    // percentages above 100 are rejected outright
    let err = chain.ledger.check_tx(&rule(&a, 3, 101)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SplitRuleCheckFailed);

    // once expired the rule is dropped and anyone may claim the resource
    let end = stored.end_block_height;
    chain.advance_to(end + 1);
    assert!(chain.ledger.split_rule("video-1").unwrap().is_none());
    chain.produce_all(vec![rule(&b, 1, 10)]);
    assert_eq!(
        chain.ledger.split_rule("video-1").unwrap().unwrap().initiator,
        b.address()
    );
}

// ════════════════════════════════════════════════════════════════════════════
// STAKING
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn validator_stake_deposit_withdraw_and_return() {
    let a = Keypair::from_seed(1);
    let v = Address::from_bytes([0x99; 20]);
    let initial = Coins::new(tokens(300_000), tokens(10));
    let mut chain = TestChain::new(vec![(a.address(), initial.clone())], vec![]);
    let stake = Coins::scpt(tokens(200_000));

    let deposit = signed(
        Tx::DepositStake(DepositStakeTx {
            fee: min_fee(),
            source: TxInput::new(a.address(), stake.clone(), 1),
            holder: TxOutput::new(v, Coins::zero()),
            purpose: StakePurpose::Validator,
            bls_pubkey: None,
            bls_pop: None,
            holder_sig: None,
        }),
        &[&a],
    );
    chain.produce_all(vec![deposit]);
    let snapshot = chain.ledger.stake_snapshot_at(chain.height()).unwrap();
    let holder = snapshot.validators.holder(&v).unwrap();
    assert_eq!(holder.total_stake(), tokens(200_000));

    let withdraw = signed(
        Tx::WithdrawStake(WithdrawStakeTx {
            fee: min_fee(),
            source: TxInput::new(a.address(), Coins::zero(), 2),
            holder: TxOutput::new(v, Coins::zero()),
            purpose: StakePurpose::Validator,
        }),
        &[&a],
    );
    let block = chain.produce_all(vec![withdraw]);
    let return_height = stake_return_height(block.height());
    assert_eq!(return_height % 100, 1);

    let snapshot = chain.ledger.stake_snapshot_at(chain.height()).unwrap();
    let holder = snapshot.validators.holder(&v).unwrap();
    assert_eq!(holder.total_stake(), BigInt::from(0));
    assert!(holder.stakes[0].withdrawn);

    // a new deposit to the same holder waits for the pending return
    let redeposit = signed(
        Tx::DepositStake(DepositStakeTx {
            fee: min_fee(),
            source: TxInput::new(a.address(), Coins::scpt(tokens(1)), 3),
            holder: TxOutput::new(v, Coins::zero()),
            purpose: StakePurpose::Validator,
            bls_pubkey: None,
            bls_pop: None,
            holder_sig: None,
        }),
        &[&a],
    );
    assert_eq!(
        chain.ledger.check_tx(&redeposit).unwrap_err().code(),
        ErrorCode::InvalidStake
    );

    chain.advance_to(return_height - 1);
    assert_eq!(chain.balance(&a.address()).scpt, tokens(100_000));
    chain.advance_to(return_height);
    assert_eq!(chain.balance(&a.address()).scpt, tokens(300_000));
    let snapshot = chain.ledger.stake_snapshot_at(return_height).unwrap();
    assert!(snapshot.validators.holder(&v).is_none());
}

#[test]
fn guardian_deposit_needs_bls_binding() {
    let a = Keypair::from_seed(1);
    let g = Keypair::from_seed(2);
    let bls = BlsKeypair::from_seed(b"guardian").unwrap();
    let mut chain = TestChain::new(
        vec![
            (a.address(), Coins::new(tokens(5_000), tokens(10))),
            (g.address(), Coins::spay(tokens(10))),
        ],
        vec![],
    );

    let deposit = |seq, pop, sig: Option<HolderSignature>| {
        signed(
            Tx::DepositStake(DepositStakeTx {
                fee: min_fee(),
                source: TxInput::new(a.address(), Coins::scpt(tokens(2_000)), seq),
                holder: TxOutput::new(g.address(), Coins::zero()),
                purpose: StakePurpose::Guardian,
                bls_pubkey: Some(bls.public_key()),
                bls_pop: pop,
                holder_sig: sig,
            }),
            &[&a],
        )
    };

    let no_pop = deposit(1, None, Some(HolderSignature::sign(&g, &a.address())));
    assert_eq!(chain.ledger.check_tx(&no_pop).unwrap_err().code(), ErrorCode::InvalidStake);

    let wrong_holder_sig = deposit(
        1,
        Some(bls.proof_of_possession()),
        Some(HolderSignature::sign(&a, &a.address())),
    );
    assert_eq!(
        chain.ledger.check_tx(&wrong_holder_sig).unwrap_err().code(),
        ErrorCode::InvalidStake
    );

    let good = deposit(
        1,
        Some(bls.proof_of_possession()),
        Some(HolderSignature::sign(&g, &a.address())),
    );
    chain.produce_all(vec![good]);
    let snapshot = chain.ledger.stake_snapshot_at(chain.height()).unwrap();
    let holder = snapshot.guardians.holder(&g.address()).unwrap();
    assert_eq!(holder.bls_pubkey, Some(bls.public_key()));

    // the guardian can now route part of its rewards
    let srd = signed(
        Tx::StakeRewardDistribution(StakeRewardDistributionTx {
            fee: min_fee(),
            holder: TxInput::new(g.address(), Coins::zero(), 1),
            beneficiary: TxOutput::new(Address::from_bytes([0x42; 20]), Coins::zero()),
            split_basis_point: 500,
        }),
        &[&g],
    );
    chain.produce_all(vec![srd]);
    let rule = chain
        .ledger
        .srd_rule_at(&g.address(), chain.height())
        .unwrap()
        .unwrap();
    assert_eq!(rule.split_basis_point, 500);
}

#[test]
fn stake_reward_distribution_requires_stake() {
    let a = Keypair::from_seed(1);
    let chain = TestChain::new(vec![(a.address(), Coins::spay(tokens(10)))], vec![]);
    let srd = |bp| {
        signed(
            Tx::StakeRewardDistribution(StakeRewardDistributionTx {
                fee: min_fee(),
                holder: TxInput::new(a.address(), Coins::zero(), 1),
                beneficiary: TxOutput::new(Address::from_bytes([0x42; 20]), Coins::zero()),
                split_basis_point: bp,
            }),
            &[&a],
        )
    };
    assert_eq!(
        chain.ledger.check_tx(&srd(100)).unwrap_err().code(),
        ErrorCode::InvalidStakeRewardDistribution
    );
    assert_eq!(
        chain.ledger.check_tx(&srd(1_001)).unwrap_err().code(),
        ErrorCode::InvalidStakeRewardDistribution
    );
}

// ════════════════════════════════════════════════════════════════════════════
// SMART CONTRACTS
// ════════════════════════════════════════════════════════════════════════════

const GAS_PRICE: u64 = 100_000_000;

fn contract_tx(from: &Keypair, seq: u64, to: Address, value: u64, data: Vec<u8>) -> Tx {
    signed(
        Tx::SmartContract(SmartContractTx {
            from: TxInput::new(from.address(), Coins::spay(value), seq),
            to: TxOutput::new(to, Coins::zero()),
            gas_limit: 200_000,
            gas_price: BigInt::from(GAS_PRICE),
            data,
        }),
        &[from],
    )
}

#[test]
fn contract_deploy_call_and_revert() {
    let a = Keypair::from_seed(1);
    let initial = Coins::spay(tokens(10));
    let mut chain = TestChain::new(vec![(a.address(), initial.clone())], vec![]);

    let code = b"kv-contract".to_vec();
    let deploy = chain.produce(vec![contract_tx(&a, 1, Address::ZERO, 0, code.clone())]);
    let contract = contract_address(&a.address(), 1);
    assert_eq!(deploy.outcomes[0].contract_address, Some(contract));
    let deploy_gas = deploy.outcomes[0].gas_used;
    assert_eq!(deploy_gas, 21_000 + 200 * code.len() as u64);

    // set a value while sending 1000 wei along
    let set = chain.produce(vec![contract_tx(&a, 2, contract, 1_000, KvVm::set_data(b"k", b"v"))]);
    assert!(!set.outcomes[0].reverted);
    assert_eq!(chain.balance(&contract), Coins::spay(1_000u64));
    let view = chain.ledger.committed_view().unwrap();
    assert_eq!(view.get_contract_storage(&contract, b"k"), Some(b"v".to_vec()));

    // a revert keeps the value, still charges gas and bumps the sequence
    let before = chain.balance(&a.address());
    let revert = chain.produce(vec![contract_tx(
        &a,
        3,
        contract,
        5_000,
        vec![scpt_ledger::vm::op::REVERT],
    )]);
    let outcome = &revert.outcomes[0];
    assert!(outcome.reverted);
    assert_eq!(chain.sequence(&a.address()), 3);
    assert_eq!(chain.balance(&contract), Coins::spay(1_000u64));
    assert_eq!(
        chain.balance(&a.address()),
        before.minus(&Coins::spay(outcome.gas_used * GAS_PRICE))
    );

    // dry run reads storage without committing anything
    let height = chain.height();
    let call = SmartContractTx {
        from: TxInput::new(Address::from_bytes([0x05; 20]), Coins::zero(), 1),
        to: TxOutput::new(contract, Coins::zero()),
        gas_limit: 100_000,
        gas_price: BigInt::from(GAS_PRICE),
        data: KvVm::get_data(b"k"),
    };
    let out = chain.ledger.call_smart_contract(&call).unwrap();
    assert_eq!(out.output, b"v".to_vec());
    assert_eq!(chain.height(), height);
}

#[test]
fn contract_value_must_be_spay_and_transfers_into_contracts_fail() {
    let a = Keypair::from_seed(1);
    let mut chain = TestChain::new(vec![(a.address(), Coins::new(tokens(10), tokens(10)))], vec![]);
    chain.produce_all(vec![contract_tx(&a, 1, Address::ZERO, 0, b"code".to_vec())]);
    let contract = contract_address(&a.address(), 1);

    let scpt_value = signed(
        Tx::SmartContract(SmartContractTx {
            from: TxInput::new(a.address(), Coins::scpt(1u64), 2),
            to: TxOutput::new(contract, Coins::zero()),
            gas_limit: 100_000,
            gas_price: BigInt::from(GAS_PRICE),
            data: vec![],
        }),
        &[&a],
    );
    assert_eq!(
        chain.ledger.check_tx(&scpt_value).unwrap_err().code(),
        ErrorCode::MalformedTx
    );

    let transfer = send(&a, 2, contract, Coins::spay(1u64));
    assert!(matches!(
        chain.ledger.check_tx(&transfer),
        Err(LedgerError::ContractTransferNotAllowed(addr)) if addr == contract
    ));

    let low_price = signed(
        Tx::SmartContract(SmartContractTx {
            from: TxInput::new(a.address(), Coins::zero(), 2),
            to: TxOutput::new(contract, Coins::zero()),
            gas_limit: 100_000,
            gas_price: BigInt::from(1u64),
            data: vec![],
        }),
        &[&a],
    );
    assert_eq!(
        chain.ledger.check_tx(&low_price).unwrap_err().code(),
        ErrorCode::InvalidGasPrice
    );
}
