// パス: src/lib.rs
// 役割: クレートのルート。モジュールの配線と主要な型の再公開
// 意図: REPL 本体とテストが同じ公開 API だけを使えるようにする
// 関連ファイル: src/repl/mod.rs, src/evaluator.rs, src/parser/mod.rs
//! Mainau REPL ルートモジュール
//!
//! 目的:
//! - Mainau（小さな動的型付きスクリプト言語）の対話環境を提供する。
//! - 入力 1 単位ごとに 読む → 解析 → 評価 → 表示 を行い、束縛はセッション中保持する。
//!
//! 方針:
//! - コメント/ドキュメントは日本語、識別子は英語。
//! - エラーは `ReplError` に集約し、致命的なもの（I/O・設定）以外は REPL を止めない。
#![allow(unexpected_cfgs)]
#![cfg_attr(coverage, feature(coverage_attribute))]

pub mod ast;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod lexer;
pub mod logger;
pub mod parser;
pub(crate) mod primitives;
pub mod repl;
pub mod runtime;
pub(crate) mod stack;

pub use crate::ast::*;
pub use crate::errors::*;
pub use crate::evaluator::{EvalOptions, Evaluator};
pub use crate::parser::*;
pub use crate::runtime::{Env, Value};
