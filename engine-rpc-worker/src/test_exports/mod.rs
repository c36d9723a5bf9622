// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! A scripted chain talking to the chain service over an in-memory stream.

mod chain_client;

pub use chain_client::ChainClient;
