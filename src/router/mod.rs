//! Route registration, controllers and matching.

mod controller;
mod core;
mod radix;
mod route;

pub use controller::{action_method_name, Action, Controller, ControllerRegistry};
pub use core::{any_verbs, RouteCollector, RouteGroup, RouteHandle, RouteLookup, RouteTable, SHELL};
pub use route::{
    action, handler, HandlerFn, ParamVec, Route, RouteMatch, Target, MAX_INLINE_PARAMS,
};
