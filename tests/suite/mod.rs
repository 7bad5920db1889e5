mod exports;
mod input;
mod resolve;
mod trace;
