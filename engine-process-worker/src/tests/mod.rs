// Copyright (c) 2022 MASSA LABS <info@massa.net>

mod scenarios;
pub(crate) mod tools;
