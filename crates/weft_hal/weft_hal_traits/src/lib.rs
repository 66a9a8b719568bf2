#![no_std]

pub mod context;
