//! Guest-side helpers the arena calls into.
//!
//! The helpers are compiled once per context from `intrinsics.js` and held as
//! plain function references, so they never appear on `globalThis`.

use crate::error::BridgeResult;
use rquickjs::{Ctx, Function, Object};

const SOURCE: &str = include_str!("intrinsics.js");

pub(crate) struct Intrinsics<'js> {
    pub is: Function<'js>,
    pub classify: Function<'js>,
    pub ctor_name: Function<'js>,
    pub describe: Function<'js>,
    pub define: Function<'js>,
    pub get: Function<'js>,
    pub set: Function<'js>,
    pub remove: Function<'js>,
    pub get_proto: Function<'js>,
    pub set_proto: Function<'js>,
    pub is_default_proto: Function<'js>,
    pub is_class: Function<'js>,
    pub function_name: Function<'js>,
    pub apply: Function<'js>,
    pub construct: Function<'js>,
    pub deferred: Function<'js>,
    pub observe: Function<'js>,
    pub module_result: Function<'js>,
    pub host_function: Function<'js>,
    pub make_proxy: Function<'js>,
    pub new_object: Function<'js>,
    pub new_array: Function<'js>,
    pub new_date: Function<'js>,
    pub get_time: Function<'js>,
    pub new_map: Function<'js>,
    pub map_entries: Function<'js>,
    pub new_set: Function<'js>,
    pub set_values: Function<'js>,
    pub to_bytes: Function<'js>,
    pub from_bytes: Function<'js>,
    pub new_url: Function<'js>,
    pub url_href: Function<'js>,
    pub new_headers: Function<'js>,
    pub headers_entries: Function<'js>,
    pub make_error: Function<'js>,
    pub error_parts: Function<'js>,
    pub new_symbol: Function<'js>,
    pub symbol_description: Function<'js>,
    pub well_known_symbols: Function<'js>,
    pub to_big_int: Function<'js>,
    pub big_int_text: Function<'js>,
    pub json_parse: Function<'js>,
    pub display: Function<'js>,
}

impl<'js> Intrinsics<'js> {
    pub fn load(ctx: &Ctx<'js>) -> BridgeResult<Self> {
        let helpers: Object<'js> = ctx.eval(SOURCE)?;
        Ok(Self {
            is: helpers.get("is")?,
            classify: helpers.get("classify")?,
            ctor_name: helpers.get("ctorName")?,
            describe: helpers.get("describe")?,
            define: helpers.get("define")?,
            get: helpers.get("get")?,
            set: helpers.get("set")?,
            remove: helpers.get("remove")?,
            get_proto: helpers.get("getProto")?,
            set_proto: helpers.get("setProto")?,
            is_default_proto: helpers.get("isDefaultProto")?,
            is_class: helpers.get("isClass")?,
            function_name: helpers.get("functionName")?,
            apply: helpers.get("apply")?,
            construct: helpers.get("construct")?,
            deferred: helpers.get("deferred")?,
            observe: helpers.get("observe")?,
            module_result: helpers.get("moduleResult")?,
            host_function: helpers.get("hostFunction")?,
            make_proxy: helpers.get("makeProxy")?,
            new_object: helpers.get("newObject")?,
            new_array: helpers.get("newArray")?,
            new_date: helpers.get("newDate")?,
            get_time: helpers.get("getTime")?,
            new_map: helpers.get("newMap")?,
            map_entries: helpers.get("mapEntries")?,
            new_set: helpers.get("newSet")?,
            set_values: helpers.get("setValues")?,
            to_bytes: helpers.get("toBytes")?,
            from_bytes: helpers.get("fromBytes")?,
            new_url: helpers.get("newUrl")?,
            url_href: helpers.get("urlHref")?,
            new_headers: helpers.get("newHeaders")?,
            headers_entries: helpers.get("headersEntries")?,
            make_error: helpers.get("makeError")?,
            error_parts: helpers.get("errorParts")?,
            new_symbol: helpers.get("newSymbol")?,
            symbol_description: helpers.get("symbolDescription")?,
            well_known_symbols: helpers.get("wellKnownSymbols")?,
            to_big_int: helpers.get("toBigInt")?,
            big_int_text: helpers.get("bigIntText")?,
            json_parse: helpers.get("jsonParse")?,
            display: helpers.get("display")?,
        })
    }
}
