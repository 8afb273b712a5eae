// Links every service module crate so its `submit_module!` registration reaches `inventory`.
// New module crates under ./modules need a line here.
#![allow(unused_imports)]

use agent_service as _;
use operator_service as _;
use skill_service as _;
