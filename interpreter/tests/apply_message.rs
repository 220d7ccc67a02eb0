// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
mod common;

use common::*;
use fil_interpreter::builtin::reward::{AwardBlockRewardParams, REWARD_ACTOR_ADDR};
use fil_interpreter::builtin::{
    ACCOUNT_ACTOR_CODE_ID, BURNT_FUNDS_ACTOR_ID, REWARD_ACTOR_ID, SYSTEM_ACTOR_ID,
};
use fil_interpreter::executor::ApplyFailure;
use fil_interpreter::gas::{OverestimationPolicy, PriceList};
use fil_interpreter::machine::Machine;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::METHOD_SEND;
use num_traits::Zero;
use pretty_assertions::assert_eq;

fn whole(n: i64) -> TokenAmount {
    TokenAmount::from_whole(n)
}

fn atto(n: i64) -> TokenAmount {
    TokenAmount::from_atto(n)
}

/// Only inclusion is priced, at a flat 8 gas, and overestimation is free.
fn flat_options() -> Options {
    Options {
        base_fee: atto(1),
        prices: PriceList {
            on_chain_message_compute_base: 8,
            ..Default::default()
        },
        overestimation: OverestimationPolicy::DISABLED,
        ..Default::default()
    }
}

#[test]
fn simple_transfer_settles_gas() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(atto(100), 5);
    let recipient = genesis.account(atto(0), 0);
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &flat_options());

    let mut msg = message(
        sender.key,
        recipient.key,
        5,
        atto(10),
        METHOD_SEND,
        RawBytes::default(),
    );
    msg.gas_limit = 20;
    msg.gas_fee_cap = atto(1);
    msg.gas_premium = atto(0);

    let ret = apply(&mut executor, msg.clone());
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::OK);
    assert_eq!(ret.msg_receipt.gas_used, 8);
    assert_eq!(ret.base_fee_burn, atto(8));
    assert_eq!(ret.refund, atto(12));
    assert!(ret.miner_tip.is_zero());
    assert!(ret.failure_info.is_none());

    let sender_state = actor(&executor, sender.id).unwrap();
    assert_eq!(sender_state.balance, atto(82));
    assert_eq!(sender_state.sequence, 6);
    assert_eq!(balance(&executor, recipient.id), atto(10));
    assert_eq!(balance(&executor, BURNT_FUNDS_ACTOR_ID), atto(8));

    // Replaying the same message is rejected without touching the state.
    let ret = apply(&mut executor, msg);
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_SENDER_STATE_INVALID);
    assert_eq!(ret.msg_receipt.gas_used, 0);
    assert_eq!(ret.penalty, atto(20));
    match ret.failure_info {
        Some(ApplyFailure::PreValidation(reason)) => {
            assert!(reason.contains("sequence invalid"), "{}", reason)
        }
        other => panic!("unexpected failure info {:?}", other),
    }
    let sender_state = actor(&executor, sender.id).unwrap();
    assert_eq!(sender_state.balance, atto(82));
    assert_eq!(sender_state.sequence, 6);
    assert_eq!(balance(&executor, recipient.id), atto(10));
}

#[test]
fn rejects_invalid_senders() {
    let mut genesis = GenesisBuilder::new();
    let funded = genesis.account(whole(10), 0);
    let target = genesis.scripted(whole(10));
    let unknown = genesis.new_key();
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let ret = apply(
        &mut executor,
        message(unknown, funded.key, 0, atto(1), METHOD_SEND, RawBytes::default()),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_SENDER_INVALID);

    // Only accounts may send explicit messages.
    let ret = apply(
        &mut executor,
        message(
            Address::new_id(target),
            funded.key,
            0,
            atto(1),
            METHOD_SEND,
            RawBytes::default(),
        ),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_SENDER_INVALID);
    assert_eq!(balance(&executor, target), whole(10));
}

#[test]
fn rejects_underfunded_messages() {
    let mut genesis = GenesisBuilder::new();
    // Enough for the gas escrow, but not for the value on top of it.
    let sender = genesis.account(atto(1_000_000_000), 0);
    let recipient = genesis.account(whole(0), 0);
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let ret = apply(
        &mut executor,
        message(sender.key, recipient.key, 0, atto(1), METHOD_SEND, RawBytes::default()),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_INSUFFICIENT_FUNDS);
    // The miner pays base fee times the gas limit for including it.
    assert_eq!(ret.penalty, atto(100 * 10_000_000));

    let sender_state = actor(&executor, sender.id).unwrap();
    assert_eq!(sender_state.balance, atto(1_000_000_000));
    assert_eq!(sender_state.sequence, 0);
}

#[test]
fn rejects_messages_that_cannot_pay_for_inclusion() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let mut msg = message(sender.key, sender.key, 0, atto(0), METHOD_SEND, RawBytes::default());
    msg.gas_limit = 100;
    let ret = apply(&mut executor, msg);
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_OUT_OF_GAS);
    assert!(ret.penalty.is_positive());
    assert_eq!(actor(&executor, sender.id).unwrap().sequence, 0);
}

#[test]
fn rejects_malformed_messages() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let mut msg = message(sender.key, sender.key, 0, atto(0), METHOD_SEND, RawBytes::default());
    msg.gas_limit = u64::MAX;
    let ret = apply(&mut executor, msg);
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_ASSERTION_FAILED);
    assert!(ret.penalty.is_zero());

    let msg = message(sender.key, sender.key, 0, atto(-1), METHOD_SEND, RawBytes::default());
    let ret = apply(&mut executor, msg);
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_ASSERTION_FAILED);
    assert_eq!(actor(&executor, sender.id).unwrap().sequence, 0);
}

#[test]
fn unknown_id_receiver_still_consumes_nonce_and_gas() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let ret = apply(
        &mut executor,
        message(
            sender.key,
            Address::new_id(4242),
            0,
            atto(5),
            METHOD_SEND,
            RawBytes::default(),
        ),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_INVALID_RECEIVER);
    assert!(ret.msg_receipt.gas_used > 0);
    assert!(matches!(
        ret.failure_info,
        Some(ApplyFailure::MessageBacktrace(_))
    ));

    let sender_state = actor(&executor, sender.id).unwrap();
    assert_eq!(sender_state.sequence, 1);
    assert!(sender_state.balance < whole(10));
    assert!(sender_state.balance > whole(10) - atto(5) - atto(100 * 10_000_000));
}

#[test]
fn sending_to_new_key_address_creates_account() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let fresh = genesis.new_key();
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    assert_eq!(executor.state_tree().lookup_id(&fresh).unwrap(), None);

    let ret = apply(
        &mut executor,
        message(sender.key, fresh, 0, whole(1), METHOD_SEND, RawBytes::default()),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::OK);

    let id = executor.state_tree().lookup_id(&fresh).unwrap().unwrap();
    let created = actor(&executor, id).unwrap();
    assert_eq!(created.code, *ACCOUNT_ACTOR_CODE_ID);
    assert_eq!(created.balance, whole(1));
    assert_eq!(created.sequence, 0);

    // The new account can send in turn.
    let ret = apply(
        &mut executor,
        message(fresh, sender.key, 0, atto(1), METHOD_SEND, RawBytes::default()),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::OK);
    assert_eq!(actor(&executor, id).unwrap().sequence, 1);
}

#[test]
fn total_balance_is_conserved() {
    let mut genesis = GenesisBuilder::new();
    let alice = genesis.account(whole(100), 0);
    let bob = genesis.account(whole(50), 0);
    let target = genesis.scripted(whole(1));
    let fresh = genesis.new_key();
    genesis.set_balance(REWARD_ACTOR_ID, whole(1000));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let before = total_balance(&mut executor);
    assert_eq!(before, whole(1151));

    let msgs = vec![
        message(alice.key, bob.key, 0, whole(3), METHOD_SEND, RawBytes::default()),
        message(bob.key, fresh, 0, whole(1), METHOD_SEND, RawBytes::default()),
        message(
            alice.key,
            Address::new_id(target),
            1,
            whole(2),
            ScriptedMethod::Abort.num(),
            RawBytes::serialize(ExitCode::USR_ILLEGAL_STATE.value()).unwrap(),
        ),
        message(
            alice.key,
            Address::new_id(target),
            2,
            atto(0),
            ScriptedMethod::Panic.num(),
            RawBytes::default(),
        ),
        message(
            bob.key,
            Address::new_id(target),
            1,
            atto(7),
            ScriptedMethod::Store.num(),
            RawBytes::serialize(9u64).unwrap(),
        ),
    ];
    for msg in msgs {
        apply(&mut executor, msg);
    }

    assert_eq!(total_balance(&mut executor), before);
    assert!(balance(&executor, BURNT_FUNDS_ACTOR_ID).is_positive());
    assert_eq!(stored_value(&executor, target), 9);
}

#[test]
fn implicit_reward_award_skips_gas_accounting() {
    let mut genesis = GenesisBuilder::new();
    let miner = genesis.account(whole(0), 0);
    genesis.set_balance(REWARD_ACTOR_ID, whole(1000));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let params = AwardBlockRewardParams {
        miner: miner.key,
        reward: whole(5),
        gas_reward: whole(1),
        penalty: atto(0),
    };
    let mut msg = message(
        Address::new_id(SYSTEM_ACTOR_ID),
        REWARD_ACTOR_ADDR,
        // Implicit messages ignore the nonce.
        42,
        atto(0),
        2,
        RawBytes::serialize(params).unwrap(),
    );
    msg.gas_fee_cap = atto(0);
    msg.gas_premium = atto(0);

    let ret = apply_implicit(&mut executor, msg);
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::OK);
    assert!(ret.msg_receipt.gas_used > 0);
    assert!(ret.base_fee_burn.is_zero());
    assert!(ret.refund.is_zero());

    assert_eq!(balance(&executor, miner.id), whole(6));
    assert_eq!(balance(&executor, REWARD_ACTOR_ID), whole(994));
    assert!(balance(&executor, BURNT_FUNDS_ACTOR_ID).is_zero());
    assert_eq!(actor(&executor, SYSTEM_ACTOR_ID).unwrap().sequence, 0);
}

#[test]
fn out_of_gas_reverts_and_consumes_limit() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let target = genesis.scripted(whole(0));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let ret = apply(
        &mut executor,
        message(
            sender.key,
            Address::new_id(target),
            0,
            atto(3),
            ScriptedMethod::BurnGas.num(),
            RawBytes::serialize(20_000_000i64).unwrap(),
        ),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_OUT_OF_GAS);
    assert_eq!(ret.msg_receipt.gas_used, 10_000_000);
    assert!(ret.refund.is_zero());
    assert_eq!(stored_value(&executor, target), 0);
    assert!(balance(&executor, target).is_zero());

    let sender_state = actor(&executor, sender.id).unwrap();
    assert_eq!(sender_state.sequence, 1);
    assert_eq!(sender_state.balance, whole(10) - atto(100 * 10_000_000));
}

#[test]
fn actor_panic_is_an_assertion_failure() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let target = genesis.scripted(whole(0));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let ret = apply(
        &mut executor,
        message(
            sender.key,
            Address::new_id(target),
            0,
            atto(3),
            ScriptedMethod::Panic.num(),
            RawBytes::default(),
        ),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::SYS_ASSERTION_FAILED);
    assert_eq!(ret.msg_receipt.gas_used, 10_000_000);
    match ret.failure_info {
        Some(ApplyFailure::MessageBacktrace(bt)) => {
            let rendered = bt.to_string();
            assert!(rendered.contains("scripted actor panicked"), "{}", rendered);
        }
        other => panic!("unexpected failure info {:?}", other),
    }
    assert!(balance(&executor, target).is_zero());

    // The machine stays usable.
    let ret = apply(
        &mut executor,
        message(sender.key, Address::new_id(target), 1, atto(3), METHOD_SEND, RawBytes::default()),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::OK);
    assert_eq!(balance(&executor, target), atto(3));
}

#[test]
fn actor_exit_codes_are_reported() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let target = genesis.scripted(whole(0));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());
    let to = Address::new_id(target);

    let cases = [
        (
            ScriptedMethod::Abort.num(),
            ExitCode::USR_ILLEGAL_STATE.value(),
            ExitCode::USR_ILLEGAL_STATE,
        ),
        // Actors may not claim success or a system code when aborting.
        (ScriptedMethod::Abort.num(), 0, ExitCode::SYS_ILLEGAL_EXIT_CODE),
        (
            ScriptedMethod::Abort.num(),
            ExitCode::SYS_OUT_OF_GAS.value(),
            ExitCode::SYS_ILLEGAL_EXIT_CODE,
        ),
        (999, 0, ExitCode::USR_UNHANDLED_MESSAGE),
    ];
    for (seq, (method, code, expected)) in cases.into_iter().enumerate() {
        let params = RawBytes::serialize(code).unwrap();
        let ret = apply(
            &mut executor,
            message(sender.key, to, seq as u64, atto(1), method, params),
        );
        assert_eq!(ret.msg_receipt.exit_code, expected, "method {} code {}", method, code);
        assert!(ret.failure_info.is_some());
    }
    // Every failed call had its value transfer reverted.
    assert!(balance(&executor, target).is_zero());
}

#[test]
fn successful_calls_return_data_and_charge_for_it() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let target = genesis.scripted(whole(0));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    let payload = RawBytes::new(vec![7; 64]);
    let short = apply(
        &mut executor,
        message(
            sender.key,
            Address::new_id(target),
            0,
            atto(0),
            ScriptedMethod::Echo.num(),
            RawBytes::default(),
        ),
    );
    let long = apply(
        &mut executor,
        message(
            sender.key,
            Address::new_id(target),
            1,
            atto(0),
            ScriptedMethod::Echo.num(),
            payload.clone(),
        ),
    );
    assert_eq!(long.msg_receipt.exit_code, ExitCode::OK);
    assert_eq!(long.msg_receipt.return_data, payload);
    // Longer params cost more to include, and the return value is charged per byte on top.
    assert!(long.msg_receipt.gas_used >= short.msg_receipt.gas_used + 2 * 64 * 1000);
}

#[test]
fn negative_gas_charges_are_refused() {
    let mut genesis = GenesisBuilder::new();
    let sender = genesis.account(whole(10), 0);
    let target = genesis.scripted(whole(0));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());
    let before = total_balance(&mut executor);

    let ret = apply(
        &mut executor,
        message(
            sender.key,
            Address::new_id(target),
            0,
            atto(0),
            ScriptedMethod::BurnGas.num(),
            RawBytes::serialize(-5_000_000i64).unwrap(),
        ),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::USR_ILLEGAL_ARGUMENT);
    assert!(ret.msg_receipt.gas_used > 0);
    assert!(ret.base_fee_burn.is_positive());
    // The write made before the refused charge is rolled back.
    assert_eq!(stored_value(&executor, target), 0);
    assert_eq!(actor(&executor, sender.id).unwrap().sequence, 1);
    assert_eq!(total_balance(&mut executor), before);
}

#[test]
fn deletion_refunds_never_drive_gas_used_negative() {
    let mut genesis = GenesisBuilder::new();
    let target = genesis.scripted(whole(0));
    let (store, root) = genesis.build();
    let mut executor = executor(store, root, &Options::default());

    // The deletion refund outweighs everything else an implicit call is charged.
    let ret = apply_implicit(
        &mut executor,
        message(
            Address::new_id(SYSTEM_ACTOR_ID),
            Address::new_id(target),
            0,
            atto(0),
            ScriptedMethod::SelfDestruct.num(),
            RawBytes::serialize(Address::new_id(BURNT_FUNDS_ACTOR_ID)).unwrap(),
        ),
    );
    assert_eq!(ret.msg_receipt.exit_code, ExitCode::OK);
    assert_eq!(ret.msg_receipt.gas_used, 0);
    assert!(actor(&executor, target).is_none());
}
